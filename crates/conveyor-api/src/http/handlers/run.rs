//! Run lifecycle handlers: start, inspect, pause, resume, cancel.
//!
//! Control operations return booleans in the response body rather than
//! failing, so stale or duplicate requests (pausing a run that already
//! completed, resuming twice) degrade gracefully. Pause and cooperative
//! cancel report that the signal was *enqueued*; the effect is observed at
//! the engine's next checkpoint, not in this response.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use conveyor_core::repository::run::RunRepository;
use conveyor_types::run::RunStatus;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body for `POST /runs/start`.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    /// The published version to execute.
    pub flow_version_id: Uuid,
    /// Starting run data (JSON object).
    #[serde(default)]
    pub input_data: Option<Value>,
    /// Explicit run identity; omitted means the engine decides
    /// (resume the latest paused run or mint a fresh id).
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Body for `POST /runs/{thread_id}/resume`.
#[derive(Debug, Default, Deserialize)]
pub struct ResumeRunRequest {
    /// Merged into `Run.data` before the run relaunches.
    #[serde(default)]
    pub updates: Option<Value>,
}

/// Body for `DELETE /runs/{thread_id}`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRunRequest {
    /// Recorded into `Run.error` when the cancel takes effect.
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/runs/start - Start or resume a run.
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<StartRunRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let thread_id = state
        .engine
        .start_workflow(
            body.flow_version_id,
            body.input_data.unwrap_or(Value::Null),
            body.thread_id,
        )
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({ "thread_id": thread_id }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/runs/{thread_id}"));

    Ok(Json(resp))
}

/// GET /api/v1/runs/:thread_id - Run status document.
pub async fn get_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let run = state
        .runs
        .get_run(&thread_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("run {thread_id} not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let run_json = serde_json::to_value(&run).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(run_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/runs/{thread_id}"))
        .with_link("flow", &format!("/api/v1/flows/{}", run.flow_version_id));

    Ok(Json(resp))
}

/// POST /api/v1/runs/:thread_id/pause - Request a cooperative pause.
pub async fn pause_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let enqueued = state.engine.pause_workflow(&thread_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({ "thread_id": thread_id, "enqueued": enqueued }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/runs/{thread_id}"));

    Ok(Json(resp))
}

/// POST /api/v1/runs/:thread_id/resume - Relaunch a paused run.
pub async fn resume_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Option<Json<ResumeRunRequest>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let updates = body.and_then(|Json(body)| body.updates);
    let resumed = state.engine.resume_workflow(&thread_id, updates).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({ "thread_id": thread_id, "resumed": resumed }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/runs/{thread_id}"));

    Ok(Json(resp))
}

/// DELETE /api/v1/runs/:thread_id - Cancel a run.
///
/// A paused run cancels synchronously; a pending or running run gets a
/// cooperative cancel signal. `cancelled` reports whether either applied.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Option<Json<CancelRunRequest>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let reason = body.and_then(|Json(body)| body.reason);
    let cancelled = state.engine.cancel_workflow(&thread_id, reason).await?;

    let status = state
        .runs
        .get_run(&thread_id)
        .await?
        .map(|run| run.status)
        .unwrap_or(RunStatus::Cancelled);

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({
            "thread_id": thread_id,
            "cancelled": cancelled,
            "status": status,
        }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/runs/{thread_id}"));

    Ok(Json(resp))
}
