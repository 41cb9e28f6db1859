//! Run repository trait definition: durable run state and control signals.
//!
//! The single concurrency primitive of the whole engine lives here:
//! [`RunRepository::compare_and_swap_status`]. Every status change in the
//! system -- from the executing worker and from control-plane requests alike
//! -- goes exclusively through it, so exactly one of two racing transitions
//! on the same run can ever win.

use conveyor_types::error::RepositoryError;
use conveyor_types::run::{Run, RunStatus, Signal};
use serde_json::Value;
use uuid::Uuid;

/// Repository trait for run and signal persistence.
///
/// Covers two entity families:
/// - **Runs:** one row per execution attempt, keyed by opaque `thread_id`.
/// - **Signals:** pending pause/cancel requests, consumed at most once.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run row. Fails with `Conflict` if the thread_id exists.
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by its thread_id.
    fn get_run(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// The most recently created run for a flow version, if any.
    fn latest_run_for_version(
        &self,
        flow_version_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// List runs for a flow version, newest first.
    fn list_runs(
        &self,
        flow_version_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    /// Atomic compare-and-swap of a run's status.
    ///
    /// Commits `new` (merging `data_patch` into `Run.data`, setting
    /// `Run.error` when `error` is given, bumping `updated_at`) **only if**
    /// the persisted status equals `expected`; otherwise nothing is mutated
    /// and `Ok(false)` is returned. A lost race is not an error -- it means
    /// the caller's request no longer applies.
    ///
    /// `expected == new` is a pure data merge (mid-run checkpointing); any
    /// other pair must be a legal edge of [`RunStatus::can_transition_to`],
    /// and an illegal pair fails with `Conflict` regardless of the stored
    /// status. A missing run fails with `NotFound`.
    fn compare_and_swap_status(
        &self,
        thread_id: &str,
        expected: RunStatus,
        new: RunStatus,
        data_patch: Option<&Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Enqueue a control signal against a run.
    fn enqueue_signal(
        &self,
        signal: &Signal,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The oldest unconsumed signal for a run, if any.
    fn next_pending_signal(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Signal>, RepositoryError>> + Send;

    /// Atomically claim a signal. Returns `true` exactly once per signal;
    /// a second claim (or a claim of an unknown id) returns `false`.
    fn consume_signal(
        &self,
        signal_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// JSON merge helper
// ---------------------------------------------------------------------------

/// Recursively merge `patch` into `target`.
///
/// Objects are merged key by key, nested objects recursively; any other value
/// (including `null`) replaces the existing one. Keys are never removed, so
/// run data stays append/merge-only during an execution and resumption never
/// loses prior progress.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_patch(existing, patch_value),
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_adds_new_keys() {
        let mut data = json!({"a": 1});
        merge_patch(&mut data, &json!({"b": 2}));
        assert_eq!(data, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_overwrites_scalars() {
        let mut data = json!({"processed_count": 3});
        merge_patch(&mut data, &json!({"processed_count": 8}));
        assert_eq!(data, json!({"processed_count": 8}));
    }

    #[test]
    fn merge_recurses_into_objects() {
        let mut data = json!({"batch": {"done": 3, "total": 8}});
        merge_patch(&mut data, &json!({"batch": {"done": 4}}));
        assert_eq!(data, json!({"batch": {"done": 4, "total": 8}}));
    }

    #[test]
    fn merge_never_removes_keys() {
        let mut data = json!({"a": 1, "nested": {"x": true}});
        merge_patch(&mut data, &json!({"nested": {"y": false}}));
        assert_eq!(data["a"], json!(1));
        assert_eq!(data["nested"]["x"], json!(true));
        assert_eq!(data["nested"]["y"], json!(false));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut data = json!({"items": [1, 2]});
        merge_patch(&mut data, &json!({"items": [3]}));
        assert_eq!(data["items"], json!([3]));
    }
}
