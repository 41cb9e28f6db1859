//! Run and signal types: the durable execution state of the engine.
//!
//! A `Run` is one execution attempt of a published flow version. Its status
//! only ever moves along the edges encoded in [`RunStatus::can_transition_to`],
//! and every transition in the system goes through the repository's
//! compare-and-swap primitive. A `Signal` is a persisted pause/cancel request
//! consumed at most once by an engine checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states are irreversible; no API returns them to `Running`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// The legal status transition table.
    ///
    /// `pending -> running -> {paused, completed, failed, cancelled}`;
    /// `paused -> running` (resume) or `paused -> cancelled`. Anything else
    /// is rejected by the store, which is what makes terminal states sticky.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One execution attempt of a flow version.
///
/// `thread_id` is opaque, unique, and stable for the run's lifetime: it is
/// assigned once at creation, survives pause/resume, and is only replaced by
/// a fresh id after a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Opaque run identifier.
    pub thread_id: String,
    /// The flow version being executed.
    pub flow_version_id: Uuid,
    /// Current status.
    pub status: RunStatus,
    /// Accumulated node outputs and partial progress (JSON object).
    /// Merge-only during a single execution -- never truncated.
    pub data: Value,
    /// Error message when the run failed or was cancelled with a reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run row was created.
    pub created_at: DateTime<Utc>,
    /// Bumped on every committed transition or data merge.
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Build a fresh pending run with the given starting data.
    ///
    /// Non-object starting data is wrapped so `data` is always a JSON object.
    pub fn fresh(thread_id: impl Into<String>, flow_version_id: Uuid, input: Value) -> Self {
        let data = match input {
            Value::Object(_) => input,
            Value::Null => json!({}),
            other => json!({ "input": other }),
        };
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            flow_version_id,
            status: RunStatus::Pending,
            data,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mint a new opaque thread id (UUIDv7, time-sortable).
    pub fn mint_thread_id() -> String {
        Uuid::now_v7().to_string()
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// The kind of control request a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    PauseRequest,
    CancelRequest,
}

/// A pending control request against a run.
///
/// Consumed at most once: an engine checkpoint atomically claims the signal
/// before acting on it, so re-delivery is impossible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// UUIDv7 signal id.
    pub id: Uuid,
    /// The run this signal targets.
    pub thread_id: String,
    /// Pause or cancel.
    pub kind: SignalKind,
    /// Caller-supplied reason (cancel requests); lands in `Run.error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether an engine checkpoint has already claimed this signal.
    pub consumed: bool,
    /// Enqueue time; signals are consumed oldest-first.
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Build a new unconsumed signal for a run.
    pub fn new(thread_id: impl Into<String>, kind: SignalKind, reason: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id: thread_id.into(),
            kind,
            reason,
            consumed: false,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RunStatus; 6] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Paused,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    // -----------------------------------------------------------------------
    // Transition table
    // -----------------------------------------------------------------------

    #[test]
    fn observed_transitions_are_exactly_the_legal_set() {
        let legal: Vec<(RunStatus, RunStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        use RunStatus::*;
        assert_eq!(
            legal,
            vec![
                (Pending, Running),
                (Running, Paused),
                (Running, Completed),
                (Running, Failed),
                (Running, Cancelled),
                (Paused, Running),
                (Paused, Cancelled),
            ]
        );
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from:?} -> {to:?} must be rejected"
                );
            }
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn run_status_serde() {
        for status in ALL {
            let text = serde_json::to_string(&status).unwrap();
            let parsed: RunStatus = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&RunStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    // -----------------------------------------------------------------------
    // Run construction
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_run_starts_pending_with_object_data() {
        let run = Run::fresh("t-1", Uuid::now_v7(), json!({"total_items": 8}));
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.data["total_items"], json!(8));
        assert!(run.error.is_none());
    }

    #[test]
    fn fresh_run_wraps_non_object_input() {
        let run = Run::fresh("t-2", Uuid::now_v7(), json!([1, 2, 3]));
        assert_eq!(run.data["input"], json!([1, 2, 3]));

        let run = Run::fresh("t-3", Uuid::now_v7(), Value::Null);
        assert_eq!(run.data, json!({}));
    }

    #[test]
    fn minted_thread_ids_are_unique() {
        let a = Run::mint_thread_id();
        let b = Run::mint_thread_id();
        assert_ne!(a, b);
        assert!(a.parse::<Uuid>().is_ok());
    }

    #[test]
    fn run_json_roundtrip() {
        let run = Run::fresh("t-4", Uuid::now_v7(), json!({"k": "v"}));
        let text = serde_json::to_string(&run).unwrap();
        let parsed: Run = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.thread_id, "t-4");
        assert_eq!(parsed.status, RunStatus::Pending);
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    #[test]
    fn signal_starts_unconsumed() {
        let signal = Signal::new("t-5", SignalKind::PauseRequest, None);
        assert!(!signal.consumed);
        assert_eq!(signal.kind, SignalKind::PauseRequest);
    }

    #[test]
    fn signal_kind_serde() {
        assert_eq!(
            serde_json::to_string(&SignalKind::PauseRequest).unwrap(),
            "\"pause_request\""
        );
        assert_eq!(
            serde_json::to_string(&SignalKind::CancelRequest).unwrap(),
            "\"cancel_request\""
        );
    }

    #[test]
    fn signal_json_roundtrip() {
        let signal = Signal::new(
            "t-6",
            SignalKind::CancelRequest,
            Some("superseded by newer import".to_string()),
        );
        let text = serde_json::to_string(&signal).unwrap();
        let parsed: Signal = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind, SignalKind::CancelRequest);
        assert_eq!(parsed.reason.as_deref(), Some("superseded by newer import"));
    }
}
