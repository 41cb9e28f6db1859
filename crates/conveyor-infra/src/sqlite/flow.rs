//! SQLite flow repository implementation.
//!
//! Implements `FlowRepository` from `conveyor-core` using sqlx with the
//! split read/write pool. Definitions are stored as JSON blobs inside the
//! immutable `flow_versions` rows.

use chrono::{DateTime, Utc};
use conveyor_core::repository::flow::FlowRepository;
use conveyor_types::error::RepositoryError;
use conveyor_types::flow::{Flow, FlowVersion, FlowVersionStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `FlowRepository`.
pub struct SqliteFlowRepository {
    pool: DatabasePool,
}

impl SqliteFlowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct FlowRow {
    id: String,
    name: String,
    created_at: String,
}

impl FlowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_flow(self) -> Result<Flow, RepositoryError> {
        Ok(Flow {
            id: parse_uuid(&self.id)?,
            name: self.name,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct FlowVersionRow {
    id: String,
    flow_id: String,
    version: i64,
    definition: String,
    status: String,
    created_at: String,
}

impl FlowVersionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            flow_id: row.try_get("flow_id")?,
            version: row.try_get("version")?,
            definition: row.try_get("definition")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_version(self) -> Result<FlowVersion, RepositoryError> {
        let definition = serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid definition JSON: {e}")))?;
        let status: FlowVersionStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid version status: {}", self.status)),
            )?;

        Ok(FlowVersion {
            id: parse_uuid(&self.id)?,
            flow_id: parse_uuid(&self.flow_id)?,
            version: self.version as u32,
            definition,
            status,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn status_to_str(status: FlowVersionStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "draft".to_string())
}

// ---------------------------------------------------------------------------
// FlowRepository impl
// ---------------------------------------------------------------------------

impl FlowRepository for SqliteFlowRepository {
    async fn create_flow(&self, flow: &Flow) -> Result<(), RepositoryError> {
        let result = sqlx::query("INSERT INTO flows (id, name, created_at) VALUES (?, ?, ?)")
            .bind(flow.id.to_string())
            .bind(&flow.name)
            .bind(format_datetime(&flow.created_at))
            .execute(&self.pool.writer)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("flow name '{}' already exists", flow.name)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_flow(&self, id: &Uuid) -> Result<Option<Flow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = FlowRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_flow()?))
            }
            None => Ok(None),
        }
    }

    async fn get_flow_by_name(&self, name: &str) -> Result<Option<Flow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM flows WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = FlowRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_flow()?))
            }
            None => Ok(None),
        }
    }

    async fn create_version(&self, version: &FlowVersion) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(&version.definition)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO flow_versions (id, flow_id, version, definition, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(version.id.to_string())
        .bind(version.flow_id.to_string())
        .bind(version.version as i64)
        .bind(&definition_json)
        .bind(status_to_str(version.status))
        .bind(format_datetime(&version.created_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "version {} of flow {} already exists",
                    version.version, version.flow_id
                )))
            }
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_version(&self, id: &Uuid) -> Result<Option<FlowVersion>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM flow_versions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = FlowVersionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_version()?))
            }
            None => Ok(None),
        }
    }

    async fn publish_version(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        // Guarded update: only a draft row flips, so publish is one-shot.
        let result = sqlx::query(
            "UPDATE flow_versions SET status = 'published' WHERE id = ? AND status = 'draft'",
        )
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_version_number(&self, flow_id: &Uuid) -> Result<Option<u32>, RepositoryError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(version) FROM flow_versions WHERE flow_id = ?")
                .bind(flow_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(row.and_then(|(max,)| max).map(|max| max as u32))
    }

    async fn list_versions(&self, flow_id: &Uuid) -> Result<Vec<FlowVersion>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM flow_versions WHERE flow_id = ? ORDER BY version ASC",
        )
        .bind(flow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = FlowVersionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            versions.push(r.into_version()?);
        }
        Ok(versions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
