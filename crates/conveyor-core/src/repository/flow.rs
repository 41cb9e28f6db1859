//! Flow repository trait definition.
//!
//! Defines the storage interface for flow identities and their immutable
//! versions. The infrastructure layer (conveyor-infra) implements this trait
//! with SQLite persistence.

use conveyor_types::error::RepositoryError;
use conveyor_types::flow::{Flow, FlowVersion};
use uuid::Uuid;

/// Repository trait for flow persistence.
///
/// Covers two entity families:
/// - **Flows:** logical workflow identities, created once per distinct name.
/// - **Versions:** immutable definition snapshots; publishing freezes them.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait FlowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Flows
    // -----------------------------------------------------------------------

    /// Insert a new flow. Fails with `Conflict` if the name already exists.
    fn create_flow(
        &self,
        flow: &Flow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a flow by its UUID.
    fn get_flow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Flow>, RepositoryError>> + Send;

    /// Get a flow by its unique name.
    fn get_flow_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Flow>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Insert a new version snapshot. Versions are immutable; edits always
    /// create a new row with a higher version number.
    fn create_version(
        &self,
        version: &FlowVersion,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a version by its UUID.
    fn get_version(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<FlowVersion>, RepositoryError>> + Send;

    /// Mark a draft version as published. Returns `true` if the version
    /// existed and was a draft; publishing is idempotent-safe (`false` for
    /// a missing or already-published version).
    fn publish_version(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Highest version number recorded for a flow, if any.
    fn latest_version_number(
        &self,
        flow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<u32>, RepositoryError>> + Send;

    /// List all versions of a flow, ordered by version number ASC.
    fn list_versions(
        &self,
        flow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<FlowVersion>, RepositoryError>> + Send;
}
