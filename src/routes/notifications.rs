//! Pending notification list.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use super::AppError;
use crate::notify::NotificationEvent;
use crate::state::AppState;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", get(pending).delete(clear))
}

/// Newest first.
async fn pending(State(state): State<AppState>) -> Result<Json<Vec<NotificationEvent>>, AppError> {
    Ok(Json(state.reconciler.pending_notifications().await?))
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared: usize,
}

async fn clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AppError> {
    // ---
    let cleared = state.reconciler.clear_notifications().await?;
    info!("DELETE /notifications - cleared {}", cleared);
    Ok(Json(ClearResponse { cleared }))
}
