// src/routes/health.rs
//! Liveness endpoint for the field state service.
//!
//! `GET /health` lets container orchestrators and CI pipelines check that the
//! process is up and the reconciler task is still accepting commands. Like
//! every sibling module it only exports a subrouter to the gateway.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sensors: usize,
}

/// Handle `GET /health`.
///
/// Answers 503 once the reconciler has stopped. Never touches the database.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    match state.reconciler.snapshot_all().await {
        Ok(records) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                sensors: records.len(),
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    sensors: 0,
                }),
            )
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
