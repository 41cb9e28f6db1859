//! In-memory reference implementation of the repository traits.
//!
//! A single mutex-guarded store implementing both [`FlowRepository`] and
//! [`RunRepository`]. It backs the engine's unit tests and is usable as a
//! lightweight store for hosts that do not need durability across restarts;
//! production deployments use the SQLite implementations in conveyor-infra.

use std::sync::Mutex;

use chrono::Utc;
use conveyor_types::error::RepositoryError;
use conveyor_types::flow::{Flow, FlowVersion, FlowVersionStatus};
use conveyor_types::run::{Run, RunStatus, Signal};
use serde_json::Value;
use uuid::Uuid;

use super::flow::FlowRepository;
use super::run::{RunRepository, merge_patch};

/// Mutex-guarded in-memory store for flows, versions, runs, and signals.
///
/// All mutations happen under one lock, which trivially serializes the
/// compare-and-swap primitive the same way the single-writer SQLite pool
/// does in production.
#[derive(Default)]
pub struct InMemoryState {
    inner: Mutex<StateInner>,
}

#[derive(Default)]
struct StateInner {
    flows: Vec<Flow>,
    versions: Vec<FlowVersion>,
    runs: Vec<Run>,
    signals: Vec<Signal>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        // A poisoned lock means a panic inside another test thread; the
        // store itself holds no invariants that a poison could break.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// FlowRepository
// ---------------------------------------------------------------------------

impl FlowRepository for InMemoryState {
    async fn create_flow(&self, flow: &Flow) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.flows.iter().any(|f| f.name == flow.name) {
            return Err(RepositoryError::Conflict(format!(
                "flow name '{}' already exists",
                flow.name
            )));
        }
        state.flows.push(flow.clone());
        Ok(())
    }

    async fn get_flow(&self, id: &Uuid) -> Result<Option<Flow>, RepositoryError> {
        Ok(self.lock().flows.iter().find(|f| f.id == *id).cloned())
    }

    async fn get_flow_by_name(&self, name: &str) -> Result<Option<Flow>, RepositoryError> {
        Ok(self.lock().flows.iter().find(|f| f.name == name).cloned())
    }

    async fn create_version(&self, version: &FlowVersion) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.versions.iter().any(|v| v.id == version.id) {
            return Err(RepositoryError::Conflict(format!(
                "version {} already exists",
                version.id
            )));
        }
        state.versions.push(version.clone());
        Ok(())
    }

    async fn get_version(&self, id: &Uuid) -> Result<Option<FlowVersion>, RepositoryError> {
        Ok(self.lock().versions.iter().find(|v| v.id == *id).cloned())
    }

    async fn publish_version(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        match state.versions.iter_mut().find(|v| v.id == *id) {
            Some(version) if version.status == FlowVersionStatus::Draft => {
                version.status = FlowVersionStatus::Published;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn latest_version_number(&self, flow_id: &Uuid) -> Result<Option<u32>, RepositoryError> {
        Ok(self
            .lock()
            .versions
            .iter()
            .filter(|v| v.flow_id == *flow_id)
            .map(|v| v.version)
            .max())
    }

    async fn list_versions(&self, flow_id: &Uuid) -> Result<Vec<FlowVersion>, RepositoryError> {
        let mut versions: Vec<FlowVersion> = self
            .lock()
            .versions
            .iter()
            .filter(|v| v.flow_id == *flow_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }
}

// ---------------------------------------------------------------------------
// RunRepository
// ---------------------------------------------------------------------------

impl RunRepository for InMemoryState {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.runs.iter().any(|r| r.thread_id == run.thread_id) {
            return Err(RepositoryError::Conflict(format!(
                "thread_id '{}' already exists",
                run.thread_id
            )));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn get_run(&self, thread_id: &str) -> Result<Option<Run>, RepositoryError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .find(|r| r.thread_id == thread_id)
            .cloned())
    }

    async fn latest_run_for_version(
        &self,
        flow_version_id: &Uuid,
    ) -> Result<Option<Run>, RepositoryError> {
        // Runs are pushed in creation order, so the last match is the newest.
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .find(|r| r.flow_version_id == *flow_version_id)
            .cloned())
    }

    async fn list_runs(
        &self,
        flow_version_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .filter(|r| r.flow_version_id == *flow_version_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn compare_and_swap_status(
        &self,
        thread_id: &str,
        expected: RunStatus,
        new: RunStatus,
        data_patch: Option<&Value>,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        if expected != new && !expected.can_transition_to(new) {
            return Err(RepositoryError::Conflict(format!(
                "illegal status transition {expected:?} -> {new:?}"
            )));
        }

        let mut state = self.lock();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.thread_id == thread_id)
            .ok_or(RepositoryError::NotFound)?;

        if run.status != expected {
            return Ok(false);
        }

        run.status = new;
        if let Some(patch) = data_patch {
            merge_patch(&mut run.data, patch);
        }
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn enqueue_signal(&self, signal: &Signal) -> Result<(), RepositoryError> {
        self.lock().signals.push(signal.clone());
        Ok(())
    }

    async fn next_pending_signal(
        &self,
        thread_id: &str,
    ) -> Result<Option<Signal>, RepositoryError> {
        // Signals are pushed in enqueue order; the first unconsumed match is
        // the oldest.
        Ok(self
            .lock()
            .signals
            .iter()
            .find(|s| s.thread_id == thread_id && !s.consumed)
            .cloned())
    }

    async fn consume_signal(&self, signal_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        match state
            .signals
            .iter_mut()
            .find(|s| s.id == *signal_id && !s.consumed)
        {
            Some(signal) => {
                signal.consumed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_types::flow::FlowDefinition;
    use conveyor_types::run::SignalKind;
    use serde_json::json;

    async fn paused_run(store: &InMemoryState, flow_version_id: Uuid) -> String {
        let run = Run::fresh(Run::mint_thread_id(), flow_version_id, json!({}));
        let thread_id = run.thread_id.clone();
        store.create_run(&run).await.unwrap();
        store
            .compare_and_swap_status(
                &thread_id,
                RunStatus::Pending,
                RunStatus::Running,
                None,
                None,
            )
            .await
            .unwrap();
        store
            .compare_and_swap_status(
                &thread_id,
                RunStatus::Running,
                RunStatus::Paused,
                None,
                None,
            )
            .await
            .unwrap();
        thread_id
    }

    // -----------------------------------------------------------------------
    // Flow family
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn flow_name_is_unique() {
        let store = InMemoryState::new();
        store.create_flow(&Flow::new("sync")).await.unwrap();
        let err = store.create_flow(&Flow::new("sync")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn publish_is_one_shot() {
        let store = InMemoryState::new();
        let flow = Flow::new("sync");
        store.create_flow(&flow).await.unwrap();
        let version = FlowVersion {
            id: Uuid::now_v7(),
            flow_id: flow.id,
            version: 1,
            definition: FlowDefinition::default(),
            status: FlowVersionStatus::Draft,
            created_at: Utc::now(),
        };
        store.create_version(&version).await.unwrap();

        assert!(store.publish_version(&version.id).await.unwrap());
        assert!(!store.publish_version(&version.id).await.unwrap());
        assert!(!store.publish_version(&Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn latest_version_number_tracks_max() {
        let store = InMemoryState::new();
        let flow = Flow::new("sync");
        store.create_flow(&flow).await.unwrap();
        assert_eq!(store.latest_version_number(&flow.id).await.unwrap(), None);

        for n in [1, 2] {
            store
                .create_version(&FlowVersion {
                    id: Uuid::now_v7(),
                    flow_id: flow.id,
                    version: n,
                    definition: FlowDefinition::default(),
                    status: FlowVersionStatus::Draft,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(
            store.latest_version_number(&flow.id).await.unwrap(),
            Some(2)
        );
    }

    // -----------------------------------------------------------------------
    // CAS semantics
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cas_mismatch_returns_false_without_mutation() {
        let store = InMemoryState::new();
        let version_id = Uuid::now_v7();
        let thread_id = paused_run(&store, version_id).await;

        // Run is paused; a running->completed request no longer applies.
        let won = store
            .compare_and_swap_status(
                &thread_id,
                RunStatus::Running,
                RunStatus::Completed,
                Some(&json!({"should_not": "land"})),
                None,
            )
            .await
            .unwrap();
        assert!(!won);

        let run = store.get_run(&thread_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert!(run.data.get("should_not").is_none());
    }

    #[tokio::test]
    async fn cas_rejects_illegal_edges() {
        let store = InMemoryState::new();
        let thread_id = paused_run(&store, Uuid::now_v7()).await;
        store
            .compare_and_swap_status(
                &thread_id,
                RunStatus::Paused,
                RunStatus::Cancelled,
                None,
                None,
            )
            .await
            .unwrap();

        // Terminal states are irreversible regardless of what a caller asks.
        let err = store
            .compare_and_swap_status(
                &thread_id,
                RunStatus::Cancelled,
                RunStatus::Running,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn cas_same_status_merges_data() {
        let store = InMemoryState::new();
        let version_id = Uuid::now_v7();
        let run = Run::fresh("t-merge", version_id, json!({"a": 1}));
        store.create_run(&run).await.unwrap();
        store
            .compare_and_swap_status("t-merge", RunStatus::Pending, RunStatus::Running, None, None)
            .await
            .unwrap();

        let won = store
            .compare_and_swap_status(
                "t-merge",
                RunStatus::Running,
                RunStatus::Running,
                Some(&json!({"b": 2})),
                None,
            )
            .await
            .unwrap();
        assert!(won);

        let run = store.get_run("t-merge").await.unwrap().unwrap();
        assert_eq!(run.data, json!({"a": 1, "b": 2}));
        assert_eq!(run.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn cas_concurrent_race_has_one_winner() {
        let store = std::sync::Arc::new(InMemoryState::new());
        let run = Run::fresh("t-race", Uuid::now_v7(), json!({}));
        store.create_run(&run).await.unwrap();
        store
            .compare_and_swap_status("t-race", RunStatus::Pending, RunStatus::Running, None, None)
            .await
            .unwrap();

        let complete = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .compare_and_swap_status(
                        "t-race",
                        RunStatus::Running,
                        RunStatus::Completed,
                        None,
                        None,
                    )
                    .await
                    .unwrap()
            })
        };
        let cancel = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .compare_and_swap_status(
                        "t-race",
                        RunStatus::Running,
                        RunStatus::Cancelled,
                        None,
                        None,
                    )
                    .await
                    .unwrap()
            })
        };

        let (complete_won, cancel_won) = (complete.await.unwrap(), cancel.await.unwrap());
        assert!(complete_won ^ cancel_won, "exactly one racer must win");

        let run = store.get_run("t-race").await.unwrap().unwrap();
        assert!(run.status.is_terminal());
    }

    #[tokio::test]
    async fn cas_unknown_run_is_not_found() {
        let store = InMemoryState::new();
        let err = store
            .compare_and_swap_status("ghost", RunStatus::Pending, RunStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn signals_consumed_oldest_first_and_at_most_once() {
        let store = InMemoryState::new();
        let first = Signal::new("t-1", SignalKind::PauseRequest, None);
        let second = Signal::new("t-1", SignalKind::CancelRequest, None);
        store.enqueue_signal(&first).await.unwrap();
        store.enqueue_signal(&second).await.unwrap();

        let pending = store.next_pending_signal("t-1").await.unwrap().unwrap();
        assert_eq!(pending.id, first.id);

        assert!(store.consume_signal(&first.id).await.unwrap());
        assert!(!store.consume_signal(&first.id).await.unwrap());

        let pending = store.next_pending_signal("t-1").await.unwrap().unwrap();
        assert_eq!(pending.id, second.id);
    }

    #[tokio::test]
    async fn signals_are_scoped_per_thread() {
        let store = InMemoryState::new();
        store
            .enqueue_signal(&Signal::new("t-a", SignalKind::PauseRequest, None))
            .await
            .unwrap();
        assert!(store.next_pending_signal("t-b").await.unwrap().is_none());
    }
}
