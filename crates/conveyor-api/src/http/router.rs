//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Flow versions
        .route("/flows", post(handlers::flow::create_flow))
        .route("/flows/{id}", get(handlers::flow::get_version))
        .route("/flows/{id}/publish", post(handlers::flow::publish_version))
        // Runs
        .route("/runs/start", post(handlers::run::start_run))
        .route(
            "/runs/{thread_id}",
            get(handlers::run::get_run).delete(handlers::run::cancel_run),
        )
        .route("/runs/{thread_id}/pause", post(handlers::run::pause_run))
        .route("/runs/{thread_id}/resume", post(handlers::run::resume_run));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
