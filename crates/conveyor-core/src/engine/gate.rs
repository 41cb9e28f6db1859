//! Signal gate: the engine-side checkpoint that turns pending control
//! signals into committed status transitions.
//!
//! At each checkpoint -- between nodes, and inside handlers via the
//! [`Checkpoint`](super::handler::Checkpoint) handle -- the gate fetches the
//! oldest unconsumed signal for its run, marks it consumed **before** acting
//! (at-most-once effect per signal), then atomically merges any partial
//! progress and commits `running -> paused` or `running -> cancelled`
//! through the store's compare-and-swap primitive.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conveyor_types::error::RepositoryError;
use conveyor_types::run::{RunStatus, SignalKind};
use serde_json::Value;

use crate::repository::run::RunRepository;

use super::handler::{HandlerError, InterruptSource, Interruption};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while consulting the signal gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("gate repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// SignalGate
// ---------------------------------------------------------------------------

/// Per-run checkpoint gate over the run repository.
///
/// Generic over `R: RunRepository` so it works with any storage backend;
/// the handler-facing [`Checkpoint`](super::handler::Checkpoint) handle
/// type-erases it.
pub struct SignalGate<R: RunRepository> {
    repo: Arc<R>,
    thread_id: String,
}

impl<R: RunRepository> SignalGate<R> {
    pub fn new(repo: Arc<R>, thread_id: String) -> Self {
        Self { repo, thread_id }
    }

    /// Consult pending signals and commit the transition if one is due.
    ///
    /// Returns `Ok(Some(_))` only after the transition is durably committed;
    /// the caller must then stop dispatching. `Ok(None)` means either no
    /// signal was pending, the signal was claimed by someone else, or the
    /// run had already left `running` (a lost race, handled gracefully).
    pub async fn poll(&self, partial: Option<&Value>) -> Result<Option<Interruption>, GateError> {
        let Some(signal) = self.repo.next_pending_signal(&self.thread_id).await? else {
            return Ok(None);
        };

        // Claim before acting so re-delivery is impossible.
        if !self.repo.consume_signal(&signal.id).await? {
            return Ok(None);
        }

        let (target, error) = match signal.kind {
            SignalKind::PauseRequest => (RunStatus::Paused, None),
            SignalKind::CancelRequest => (
                RunStatus::Cancelled,
                Some(
                    signal
                        .reason
                        .clone()
                        .unwrap_or_else(|| "cancel requested".to_string()),
                ),
            ),
        };

        let committed = self
            .repo
            .compare_and_swap_status(
                &self.thread_id,
                RunStatus::Running,
                target,
                partial,
                error.as_deref(),
            )
            .await?;

        if !committed {
            tracing::warn!(
                thread_id = self.thread_id.as_str(),
                kind = ?signal.kind,
                "signal consumed but run was no longer running"
            );
            return Ok(None);
        }

        tracing::info!(
            thread_id = self.thread_id.as_str(),
            kind = ?signal.kind,
            "control signal took effect"
        );

        Ok(Some(Interruption {
            kind: signal.kind,
            reason: signal.reason,
        }))
    }
}

impl<R: RunRepository> Clone for SignalGate<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            thread_id: self.thread_id.clone(),
        }
    }
}

impl<R: RunRepository> InterruptSource for SignalGate<R> {
    fn poll_boxed<'a>(
        &'a self,
        partial: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Interruption>, HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            self.poll(Some(&partial))
                .await
                .map_err(|e| HandlerError::Checkpoint(e.to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
