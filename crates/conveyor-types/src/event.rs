//! Run progress events published by the execution engine.
//!
//! Events are advisory: the durable run store remains the sole source of
//! truth, and a caller can only rely on a transition after the CAS call that
//! performed it returned successfully. Subscribers (API, tests) use events
//! to observe progress without polling.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress event for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A worker picked up the run and committed `pending/paused -> running`.
    RunStarted {
        thread_id: String,
        flow_version_id: Uuid,
        /// True when the worker continued from a paused checkpoint.
        resumed: bool,
    },
    /// The engine dispatched a node.
    NodeStarted { thread_id: String, node_id: String },
    /// A node returned and its outputs were checkpointed.
    NodeCompleted { thread_id: String, node_id: String },
    /// A pause request took effect at a checkpoint.
    RunPaused { thread_id: String, node_id: Option<String> },
    /// The run reached the end of its plan.
    RunCompleted { thread_id: String },
    /// A handler error or configuration error failed the run.
    RunFailed { thread_id: String, error: String },
    /// A cancel request took effect (cooperatively or on a paused run).
    RunCancelled { thread_id: String, reason: Option<String> },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn thread_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { thread_id, .. }
            | RunEvent::NodeStarted { thread_id, .. }
            | RunEvent::NodeCompleted { thread_id, .. }
            | RunEvent::RunPaused { thread_id, .. }
            | RunEvent::RunCompleted { thread_id }
            | RunEvent::RunFailed { thread_id, .. }
            | RunEvent::RunCancelled { thread_id, .. } => thread_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_tagging() {
        let event = RunEvent::RunPaused {
            thread_id: "t-1".into(),
            node_id: Some("fetch".into()),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"type\":\"run_paused\""));
        let parsed: RunEvent = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, RunEvent::RunPaused { .. }));
    }

    #[test]
    fn thread_id_accessor_covers_all_variants() {
        let events = [
            RunEvent::RunStarted {
                thread_id: "t".into(),
                flow_version_id: Uuid::now_v7(),
                resumed: false,
            },
            RunEvent::NodeStarted { thread_id: "t".into(), node_id: "a".into() },
            RunEvent::NodeCompleted { thread_id: "t".into(), node_id: "a".into() },
            RunEvent::RunPaused { thread_id: "t".into(), node_id: None },
            RunEvent::RunCompleted { thread_id: "t".into() },
            RunEvent::RunFailed { thread_id: "t".into(), error: "boom".into() },
            RunEvent::RunCancelled { thread_id: "t".into(), reason: None },
        ];
        for event in events {
            assert_eq!(event.thread_id(), "t");
        }
    }
}
