//! Run executor and control plane.
//!
//! `Engine` owns the bounded worker pool and drives the run state machine:
//! `pending -> running -> {paused, completed, failed, cancelled}` with
//! `paused -> running` on resume and `paused -> cancelled` on synchronous
//! cancel. Every transition goes through the repository's compare-and-swap
//! primitive, so a worker and a control-plane request racing on the same run
//! can never both win.
//!
//! `start_workflow` returns as soon as the run is scheduled; execution
//! happens on a worker task that holds one pool permit for as long as the
//! run is actively running. A paused run holds no permit, only its row.

use std::sync::Arc;

use conveyor_types::error::RepositoryError;
use conveyor_types::event::RunEvent;
use conveyor_types::flow::{FlowVersionStatus, NodeConfig};
use conveyor_types::run::{Run, RunStatus, Signal, SignalKind};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::flow::FlowRepository;
use crate::repository::run::{RunRepository, merge_patch};

use super::compiler::{CompileError, CompiledPlan, compile};
use super::expression;
use super::gate::{GateError, SignalGate};
use super::handler::{Checkpoint, HandlerError, Interruption, NodeContext, NodeOutcome};
use super::registry::HandlerRegistry;

/// Reserved key in `Run.data` holding the id of the next node to dispatch.
/// A string value is the position a resumed run continues from; `null` means
/// the plan was exhausted. Absent on a run that never completed a node.
pub const CURSOR_KEY: &str = "__cursor";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced synchronously by engine entry points.
///
/// Handler failures and unresolved code_refs are *not* here: they are
/// converted into `failed` runs on the worker, isolated per run, and never
/// take down the pool.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The addressed flow version does not exist.
    #[error("flow version not found: {0}")]
    VersionNotFound(Uuid),

    /// Runs can only be started against published versions.
    #[error("flow version {0} is not published")]
    NotPublished(Uuid),

    /// Definition failed validation; raised before any run row exists.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Signal gate failure.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Storage failure.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The workflow engine: compiler front door, worker pool, and control plane.
///
/// Generic over the flow and run repositories for storage flexibility; the
/// handler registry is an explicit value handed in by the host application.
pub struct Engine<F, R>
where
    F: FlowRepository + 'static,
    R: RunRepository + 'static,
{
    flows: Arc<F>,
    runs: Arc<R>,
    registry: Arc<HandlerRegistry>,
    events: EventBus,
    workers: Arc<Semaphore>,
}

/// How a start request maps onto a run row.
enum Launch {
    /// Continue a paused run from its persisted position.
    Resume(Run),
    /// Create a fresh pending run under this thread_id.
    Fresh(String),
}

impl<F, R> Engine<F, R>
where
    F: FlowRepository + 'static,
    R: RunRepository + 'static,
{
    pub fn new(
        flows: Arc<F>,
        runs: Arc<R>,
        registry: HandlerRegistry,
        events: EventBus,
        worker_count: usize,
    ) -> Self {
        Self {
            flows,
            runs,
            registry: Arc::new(registry),
            events,
            workers: Arc::new(Semaphore::new(worker_count.max(1))),
        }
    }

    /// The engine's event bus, for subscribers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Direct access to the run repository (status queries).
    pub fn runs(&self) -> &Arc<R> {
        &self.runs
    }

    // -----------------------------------------------------------------------
    // start_workflow
    // -----------------------------------------------------------------------

    /// Schedule a run of a flow version and return its thread_id.
    ///
    /// - An explicit `thread_id` is always honored verbatim (the caller
    ///   asserts identity): a paused row under that id is resumed, an absent
    ///   row is created fresh, and an active or terminal row makes the call
    ///   a graceful no-op that still returns the id.
    /// - Without a `thread_id`, the most recent run for the version decides:
    ///   paused means resume (same thread_id, no work repeated); anything
    ///   else mints a new opaque thread_id and starts from the entry node.
    ///
    /// `input` seeds `Run.data` for fresh runs and is ignored on resume
    /// (resume-time updates go through [`Engine::resume_workflow`]).
    pub async fn start_workflow(
        &self,
        flow_version_id: Uuid,
        input: Value,
        thread_id: Option<String>,
    ) -> Result<String, EngineError> {
        let launch = match thread_id {
            Some(id) => match self.runs.get_run(&id).await? {
                Some(run) if run.status == RunStatus::Paused => Launch::Resume(run),
                Some(run) => {
                    tracing::debug!(
                        thread_id = id.as_str(),
                        status = ?run.status,
                        "start request ignored; run is not startable"
                    );
                    return Ok(id);
                }
                None => Launch::Fresh(id),
            },
            None => match self.runs.latest_run_for_version(&flow_version_id).await? {
                Some(run) if run.status == RunStatus::Paused => Launch::Resume(run),
                // No prior run, a terminal one, or one that is still active:
                // mint a fresh, independent thread_id.
                _ => Launch::Fresh(Run::mint_thread_id()),
            },
        };

        match launch {
            Launch::Resume(run) => {
                let version = self
                    .flows
                    .get_version(&run.flow_version_id)
                    .await?
                    .ok_or(EngineError::VersionNotFound(run.flow_version_id))?;
                let plan = Arc::new(compile(&version.definition)?);
                let thread_id = run.thread_id.clone();
                self.spawn_worker(plan, version.id, thread_id.clone(), true);
                Ok(thread_id)
            }
            Launch::Fresh(thread_id) => {
                let version = self
                    .flows
                    .get_version(&flow_version_id)
                    .await?
                    .ok_or(EngineError::VersionNotFound(flow_version_id))?;
                if version.status != FlowVersionStatus::Published {
                    return Err(EngineError::NotPublished(flow_version_id));
                }
                // Compile before touching the run store: a malformed
                // definition must fail with no run row created.
                let plan = Arc::new(compile(&version.definition)?);
                self.runs
                    .create_run(&Run::fresh(&thread_id, flow_version_id, input))
                    .await?;
                self.spawn_worker(plan, flow_version_id, thread_id.clone(), false);
                Ok(thread_id)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Control plane
    // -----------------------------------------------------------------------

    /// Request a cooperative pause. Valid only while the run is `running`.
    ///
    /// Returns whether the signal was enqueued, not whether the pause has
    /// taken effect -- the effect is observed at the engine's next checkpoint.
    pub async fn pause_workflow(&self, thread_id: &str) -> Result<bool, EngineError> {
        let Some(run) = self.runs.get_run(thread_id).await? else {
            return Ok(false);
        };
        if run.status != RunStatus::Running {
            return Ok(false);
        }
        self.runs
            .enqueue_signal(&Signal::new(thread_id, SignalKind::PauseRequest, None))
            .await?;
        tracing::info!(thread_id, "pause requested");
        Ok(true)
    }

    /// Relaunch a paused run from its stored position. Valid only while
    /// `paused`; `updates` are merged into `Run.data` before relaunch.
    pub async fn resume_workflow(
        &self,
        thread_id: &str,
        updates: Option<Value>,
    ) -> Result<bool, EngineError> {
        let Some(run) = self.runs.get_run(thread_id).await? else {
            return Ok(false);
        };
        if run.status != RunStatus::Paused {
            return Ok(false);
        }
        if let Some(updates) = updates {
            // paused -> paused is a pure data merge through the same
            // primitive; losing this race (e.g. to a cancel) aborts the
            // resume.
            let merged = self
                .runs
                .compare_and_swap_status(
                    thread_id,
                    RunStatus::Paused,
                    RunStatus::Paused,
                    Some(&updates),
                    None,
                )
                .await?;
            if !merged {
                return Ok(false);
            }
        }
        self.start_workflow(run.flow_version_id, Value::Null, Some(thread_id.to_string()))
            .await?;
        Ok(true)
    }

    /// Cancel a run. A paused run is cancelled synchronously (there is no
    /// executor to notify); a pending or running run gets a cooperative
    /// cancel signal consumed at the next checkpoint.
    pub async fn cancel_workflow(
        &self,
        thread_id: &str,
        reason: Option<String>,
    ) -> Result<bool, EngineError> {
        let Some(run) = self.runs.get_run(thread_id).await? else {
            return Ok(false);
        };
        match run.status {
            RunStatus::Paused => {
                let committed = self
                    .runs
                    .compare_and_swap_status(
                        thread_id,
                        RunStatus::Paused,
                        RunStatus::Cancelled,
                        None,
                        Some(reason.as_deref().unwrap_or("cancel requested")),
                    )
                    .await?;
                if committed {
                    self.events.publish(RunEvent::RunCancelled {
                        thread_id: thread_id.to_string(),
                        reason: reason.clone(),
                    });
                    tracing::info!(thread_id, "paused run cancelled");
                }
                Ok(committed)
            }
            RunStatus::Pending | RunStatus::Running => {
                self.runs
                    .enqueue_signal(&Signal::new(thread_id, SignalKind::CancelRequest, reason))
                    .await?;
                tracing::info!(thread_id, "cancel requested");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------------

    fn spawn_worker(
        &self,
        plan: Arc<CompiledPlan>,
        flow_version_id: Uuid,
        thread_id: String,
        resume: bool,
    ) {
        let runs = Arc::clone(&self.runs);
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let workers = Arc::clone(&self.workers);

        tokio::spawn(async move {
            // One pool permit per actively running run, held until the
            // worker settles the run one way or another.
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let expected = if resume {
                RunStatus::Paused
            } else {
                RunStatus::Pending
            };
            match runs
                .compare_and_swap_status(&thread_id, expected, RunStatus::Running, None, None)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // Another transition won (duplicate resume, early
                    // cancel); this worker's request no longer applies.
                    tracing::debug!(thread_id = thread_id.as_str(), "lost start race");
                    return;
                }
                Err(e) => {
                    tracing::error!(thread_id = thread_id.as_str(), error = %e, "failed to claim run");
                    return;
                }
            }

            events.publish(RunEvent::RunStarted {
                thread_id: thread_id.clone(),
                flow_version_id,
                resumed: resume,
            });
            tracing::info!(
                thread_id = thread_id.as_str(),
                resumed = resume,
                "run claimed by worker"
            );

            if let Err(e) = drive(&runs, &registry, &events, &plan, &thread_id).await {
                // Storage-level failure mid-run: best effort to record it.
                tracing::error!(thread_id = thread_id.as_str(), error = %e, "worker aborted");
                let message = format!("worker aborted: {e}");
                let _ = runs
                    .compare_and_swap_status(
                        &thread_id,
                        RunStatus::Running,
                        RunStatus::Failed,
                        None,
                        Some(&message),
                    )
                    .await;
                events.publish(RunEvent::RunFailed {
                    thread_id: thread_id.clone(),
                    error: message,
                });
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Plan walker
// ---------------------------------------------------------------------------

/// Walk the plan from the run's current position until it settles.
///
/// Ok(()) means the run reached a committed terminal or paused state (or
/// gracefully lost a race); Err means the store itself failed.
async fn drive<R: RunRepository + 'static>(
    runs: &Arc<R>,
    registry: &HandlerRegistry,
    events: &EventBus,
    plan: &CompiledPlan,
    thread_id: &str,
) -> Result<(), EngineError> {
    let gate = SignalGate::new(Arc::clone(runs), thread_id.to_string());

    let run = runs
        .get_run(thread_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    let mut data = run.data;

    // Fresh runs start at the entry; resumed runs continue at the persisted
    // cursor. A null cursor means the previous execution exhausted the plan.
    let mut cursor: Option<String> = match data.get(CURSOR_KEY) {
        None => plan.entry().map(str::to_string),
        Some(Value::String(next)) => Some(next.clone()),
        Some(_) => None,
    };

    loop {
        // Engine checkpoint: consult pending control signals before
        // dispatching the next node.
        if let Some(interruption) = gate.poll(None).await? {
            publish_interruption(events, thread_id, None, &interruption);
            return Ok(());
        }

        let Some(node_id) = cursor.clone() else {
            return finish_completed(runs, events, thread_id).await;
        };
        let Some(node) = plan.node(&node_id) else {
            // Cursor from an older definition that no longer matches.
            return finish_failed(
                runs,
                events,
                thread_id,
                format!("plan has no node '{node_id}'"),
            )
            .await;
        };

        events.publish(RunEvent::NodeStarted {
            thread_id: thread_id.to_string(),
            node_id: node_id.clone(),
        });
        tracing::debug!(thread_id, node_id = node_id.as_str(), kind = node.config.kind(), "dispatching node");

        match &node.config {
            NodeConfig::Start {} => {
                cursor = plan.successor(&node_id).map(str::to_string);
            }
            NodeConfig::End {} => {
                return finish_completed(runs, events, thread_id).await;
            }
            NodeConfig::Task { code_ref, args } => {
                let Some(handler) = registry.resolve(code_ref) else {
                    return finish_failed(
                        runs,
                        events,
                        thread_id,
                        format!("no handler registered for code_ref '{code_ref}'"),
                    )
                    .await;
                };

                let ctx = NodeContext {
                    thread_id: thread_id.to_string(),
                    node_id: node_id.clone(),
                    data: data.clone(),
                    args: args.clone(),
                    checkpoint: Checkpoint::new(Arc::new(gate.clone())),
                };

                match handler.call_boxed(ctx).await {
                    Ok(NodeOutcome::Completed(updates)) => {
                        let next = plan.successor(&node_id).map(str::to_string);
                        if !advance(runs, thread_id, &mut data, updates, next.as_deref()).await? {
                            return Ok(());
                        }
                        events.publish(RunEvent::NodeCompleted {
                            thread_id: thread_id.to_string(),
                            node_id: node_id.clone(),
                        });
                        cursor = next;
                    }
                    Ok(NodeOutcome::Interrupted(interruption)) => {
                        publish_interruption(events, thread_id, Some(&node_id), &interruption);
                        return Ok(());
                    }
                    Err(HandlerError::Checkpoint(message)) => {
                        return Err(GateError::Repository(RepositoryError::Query(message)).into());
                    }
                    Err(e) => {
                        return finish_failed(
                            runs,
                            events,
                            thread_id,
                            format!("node '{node_id}' failed: {e}"),
                        )
                        .await;
                    }
                }
            }
            NodeConfig::Condition { expression: predicate, on_true, on_false } => {
                let branch = match expression::evaluate(predicate, &data) {
                    Ok(true) => on_true.as_deref(),
                    Ok(false) => on_false.as_deref(),
                    Err(e) => {
                        return finish_failed(
                            runs,
                            events,
                            thread_id,
                            format!("condition '{node_id}' failed to evaluate: {e}"),
                        )
                        .await;
                    }
                };
                let Some(next) = branch else {
                    return finish_failed(
                        runs,
                        events,
                        thread_id,
                        format!("condition '{node_id}' matched no branch"),
                    )
                    .await;
                };
                let next = next.to_string();
                if !advance(runs, thread_id, &mut data, json!({}), Some(next.as_str())).await? {
                    return Ok(());
                }
                events.publish(RunEvent::NodeCompleted {
                    thread_id: thread_id.to_string(),
                    node_id: node_id.clone(),
                });
                cursor = Some(next);
            }
        }
    }
}

/// Commit a completed node: merge its updates plus the advanced cursor into
/// `Run.data` via a same-status CAS. Returns false if the run left `running`
/// under us (stop dispatching, someone else settled it).
async fn advance<R: RunRepository>(
    runs: &Arc<R>,
    thread_id: &str,
    data: &mut Value,
    updates: Value,
    next: Option<&str>,
) -> Result<bool, EngineError> {
    let mut patch = match updates {
        Value::Object(_) => updates,
        Value::Null => json!({}),
        // Handlers are documented to return objects; wrap anything else so
        // the output is still visible in the run data.
        other => json!({ "output": other }),
    };
    patch[CURSOR_KEY] = match next {
        Some(next) => Value::String(next.to_string()),
        None => Value::Null,
    };

    let committed = runs
        .compare_and_swap_status(
            thread_id,
            RunStatus::Running,
            RunStatus::Running,
            Some(&patch),
            None,
        )
        .await?;
    if committed {
        merge_patch(data, &patch);
    } else {
        tracing::debug!(thread_id, "checkpoint lost race; run no longer running");
    }
    Ok(committed)
}

async fn finish_completed<R: RunRepository>(
    runs: &Arc<R>,
    events: &EventBus,
    thread_id: &str,
) -> Result<(), EngineError> {
    let committed = runs
        .compare_and_swap_status(thread_id, RunStatus::Running, RunStatus::Completed, None, None)
        .await?;
    if committed {
        events.publish(RunEvent::RunCompleted {
            thread_id: thread_id.to_string(),
        });
        tracing::info!(thread_id, "run completed");
    }
    Ok(())
}

async fn finish_failed<R: RunRepository>(
    runs: &Arc<R>,
    events: &EventBus,
    thread_id: &str,
    message: String,
) -> Result<(), EngineError> {
    let committed = runs
        .compare_and_swap_status(
            thread_id,
            RunStatus::Running,
            RunStatus::Failed,
            None,
            Some(&message),
        )
        .await?;
    if committed {
        events.publish(RunEvent::RunFailed {
            thread_id: thread_id.to_string(),
            error: message.clone(),
        });
        tracing::warn!(thread_id, error = message.as_str(), "run failed");
    }
    Ok(())
}

fn publish_interruption(
    events: &EventBus,
    thread_id: &str,
    node_id: Option<&str>,
    interruption: &Interruption,
) {
    match interruption.kind {
        SignalKind::PauseRequest => events.publish(RunEvent::RunPaused {
            thread_id: thread_id.to_string(),
            node_id: node_id.map(str::to_string),
        }),
        SignalKind::CancelRequest => events.publish(RunEvent::RunCancelled {
            thread_id: thread_id.to_string(),
            reason: interruption.reason.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
