//! Flow definition handlers: create versions, publish, inspect.
//!
//! Creating a flow validates the definition through the plan compiler before
//! anything is persisted, so a malformed graph is rejected synchronously and
//! no run can ever exist for it.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use conveyor_core::engine::compiler::compile;
use conveyor_core::repository::flow::FlowRepository;
use conveyor_types::flow::{Flow, FlowDefinition, FlowVersion, FlowVersionStatus};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body for `POST /flows`.
#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    /// Flow name; the flow identity is created on first use of a name.
    pub name: String,
    /// The node/edge graph for the new version.
    pub definition: FlowDefinition,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/flows - Create a new draft flow version.
///
/// The flow identity is created once per distinct name; every call mints a
/// new immutable version under it.
pub async fn create_flow(
    State(state): State<AppState>,
    Json(body): Json<CreateFlowRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.name.is_empty() {
        return Err(AppError::Validation("flow name must not be empty".to_string()));
    }
    if !body.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(AppError::Validation(format!(
            "flow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            body.name
        )));
    }

    // Validate before persisting anything.
    compile(&body.definition).map_err(conveyor_core::engine::executor::EngineError::Compile)?;

    let flow = match state.flows.get_flow_by_name(&body.name).await? {
        Some(flow) => flow,
        None => {
            let flow = Flow::new(&body.name);
            state.flows.create_flow(&flow).await?;
            flow
        }
    };

    let number = state.flows.latest_version_number(&flow.id).await?.unwrap_or(0) + 1;
    let version = FlowVersion {
        id: Uuid::now_v7(),
        flow_id: flow.id,
        version: number,
        definition: body.definition,
        status: FlowVersionStatus::Draft,
        created_at: Utc::now(),
    };
    state.flows.create_version(&version).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({
            "flow_version_id": version.id.to_string(),
            "flow_id": flow.id.to_string(),
            "version": version.version,
            "status": "draft",
        }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/flows/{}", version.id))
    .with_link("publish", &format!("/api/v1/flows/{}/publish", version.id));

    Ok(Json(resp))
}

/// GET /api/v1/flows/:id - Get a flow version document.
pub async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let version = state
        .flows
        .get_version(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("flow version {id} not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let version_json = serde_json::to_value(&version)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(version_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/flows/{id}"));

    Ok(Json(resp))
}

/// POST /api/v1/flows/:id/publish - Freeze a draft version.
///
/// Idempotent: publishing an already-published version succeeds without
/// changing anything.
pub async fn publish_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if state.flows.get_version(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("flow version {id} not found")));
    }
    let newly_published = state.flows.publish_version(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        json!({
            "flow_version_id": id.to_string(),
            "status": "published",
            "newly_published": newly_published,
        }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/flows/{id}"))
    .with_link("start", "/api/v1/runs/start");

    Ok(Json(resp))
}
