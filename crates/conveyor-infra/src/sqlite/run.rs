//! SQLite run repository implementation: durable run rows, control signals,
//! and the compare-and-swap status primitive.
//!
//! The CAS runs as a transaction on the single-connection writer pool: read
//! the current row, bail with `false` on an expected-status mismatch, merge
//! the data patch in Rust, then commit a guarded UPDATE. The single writer
//! connection serializes transactions, so exactly one of two racing
//! transitions can ever win.

use chrono::{DateTime, Utc};
use conveyor_core::repository::run::{RunRepository, merge_patch};
use conveyor_types::error::RepositoryError;
use conveyor_types::run::{Run, RunStatus, Signal, SignalKind};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RunRepository`.
pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    thread_id: String,
    flow_version_id: String,
    status: String,
    data: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            flow_version_id: row.try_get("flow_version_id")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let data: serde_json::Value = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Query(format!("invalid run data JSON: {e}")))?;

        Ok(Run {
            thread_id: self.thread_id,
            flow_version_id: parse_uuid(&self.flow_version_id)?,
            status: status_from_str(&self.status)?,
            data,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct SignalRow {
    id: String,
    thread_id: String,
    kind: String,
    reason: Option<String>,
    consumed: i64,
    created_at: String,
}

impl SignalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            kind: row.try_get("kind")?,
            reason: row.try_get("reason")?,
            consumed: row.try_get("consumed")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_signal(self) -> Result<Signal, RepositoryError> {
        let kind: SignalKind =
            serde_json::from_value(serde_json::Value::String(self.kind.clone()))
                .map_err(|_| RepositoryError::Query(format!("invalid signal kind: {}", self.kind)))?;

        Ok(Signal {
            id: parse_uuid(&self.id)?,
            thread_id: self.thread_id,
            kind,
            reason: self.reason,
            consumed: self.consumed != 0,
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

fn status_to_str(status: RunStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "pending".to_string())
}

fn status_from_str(s: &str) -> Result<RunStatus, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid run status: {s}")))
}

fn kind_to_str(kind: SignalKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "pause_request".to_string())
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let data_json = serde_json::to_string(&run.data)
            .map_err(|e| RepositoryError::Query(format!("serialize run data: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO runs
               (thread_id, flow_version_id, status, data, error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&run.thread_id)
        .bind(run.flow_version_id.to_string())
        .bind(status_to_str(run.status))
        .bind(&data_json)
        .bind(&run.error)
        .bind(format_datetime(&run.created_at))
        .bind(format_datetime(&run.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("thread_id '{}' already exists", run.thread_id)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_run(&self, thread_id: &str) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn latest_run_for_version(
        &self,
        flow_version_id: &Uuid,
    ) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM runs WHERE flow_version_id = ? ORDER BY created_at DESC, thread_id DESC LIMIT 1",
        )
        .bind(flow_version_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        flow_version_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE flow_version_id = ? ORDER BY created_at DESC, thread_id DESC LIMIT ?",
        )
        .bind(flow_version_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn compare_and_swap_status(
        &self,
        thread_id: &str,
        expected: RunStatus,
        new: RunStatus,
        data_patch: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        if expected != new && !expected.can_transition_to(new) {
            return Err(RepositoryError::Conflict(format!(
                "illegal status transition {expected:?} -> {new:?}"
            )));
        }

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT status, data FROM runs WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Err(RepositoryError::NotFound);
        };

        let current: String = row
            .try_get("status")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        if status_from_str(&current)? != expected {
            // Mismatch: mutate nothing. The caller's request no longer applies.
            return Ok(false);
        }

        let data_json = if let Some(patch) = data_patch {
            let stored: String = row
                .try_get("data")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let mut data: serde_json::Value = serde_json::from_str(&stored)
                .map_err(|e| RepositoryError::Query(format!("invalid run data JSON: {e}")))?;
            merge_patch(&mut data, patch);
            Some(
                serde_json::to_string(&data)
                    .map_err(|e| RepositoryError::Query(format!("serialize run data: {e}")))?,
            )
        } else {
            None
        };

        // Guarded update inside the transaction; the status predicate is a
        // second line of defense against anything slipping past the read.
        let result = sqlx::query(
            r#"UPDATE runs
               SET status = ?, data = COALESCE(?, data), error = COALESCE(?, error), updated_at = ?
               WHERE thread_id = ? AND status = ?"#,
        )
        .bind(status_to_str(new))
        .bind(&data_json)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(thread_id)
        .bind(status_to_str(expected))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(true)
    }

    async fn enqueue_signal(&self, signal: &Signal) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO signals (id, thread_id, kind, reason, consumed, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.thread_id)
        .bind(kind_to_str(signal.kind))
        .bind(&signal.reason)
        .bind(signal.consumed as i64)
        .bind(format_datetime(&signal.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn next_pending_signal(
        &self,
        thread_id: &str,
    ) -> Result<Option<Signal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM signals WHERE thread_id = ? AND consumed = 0 ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = SignalRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_signal()?))
            }
            None => Ok(None),
        }
    }

    async fn consume_signal(&self, signal_id: &Uuid) -> Result<bool, RepositoryError> {
        // Guarded update: flips at most once, so an already-claimed signal
        // cannot be re-delivered.
        let result = sqlx::query("UPDATE signals SET consumed = 1 WHERE id = ? AND consumed = 0")
            .bind(signal_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
