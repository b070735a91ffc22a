//! Publishing into the in-process anomaly and device-state feeds.
//!
//! Whatever pushes these signals (a detector, a rules engine, an operator)
//! posts here; the collectors' pumps carry the change to the reconciler.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::Serialize;
use tracing::info;

use super::AppError;
use crate::error::Error;
use crate::models::{AnomalySnapshot, DeviceStateSnapshot};
use crate::state::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/signals/anomaly", get(current_anomaly).post(publish_anomaly))
        .route("/signals/devices", post(publish_devices))
}

#[derive(Debug, Serialize)]
struct PublishResponse<T> {
    changed: bool,
    snapshot: T,
}

async fn current_anomaly(State(state): State<AppState>) -> Json<AnomalySnapshot> {
    Json(state.anomaly_feed.current())
}

/// Merge a partial `{metric: bool}` map into the anomaly snapshot.
async fn publish_anomaly(
    State(state): State<AppState>,
    Json(update): Json<AnomalySnapshot>,
) -> Result<Json<PublishResponse<AnomalySnapshot>>, AppError> {
    // ---
    if update.iter().any(|(metric, _)| metric.trim().is_empty()) {
        return Err(Error::InvalidInput("metric names must not be empty".to_string()).into());
    }
    let changed = state.anomaly_feed.publish(&update);
    if changed {
        info!("POST /signals/anomaly - snapshot changed");
    }
    Ok(Json(PublishResponse {
        changed,
        snapshot: state.anomaly_feed.current(),
    }))
}

/// Merge `{device: "on"|"off"}` relay suggestions. Unrecognized states are
/// accepted here and skipped by the reconciler.
async fn publish_devices(
    State(state): State<AppState>,
    Json(update): Json<DeviceStateSnapshot>,
) -> Result<Json<PublishResponse<DeviceStateSnapshot>>, AppError> {
    // ---
    if update.keys().any(|device| device.trim().is_empty()) {
        return Err(Error::InvalidInput("device ids must not be empty".to_string()).into());
    }
    let changed = state.device_feed.publish(&update);
    if changed {
        info!("POST /signals/devices - {} device state(s) posted", update.len());
    }
    Ok(Json(PublishResponse {
        changed,
        snapshot: state.device_feed.current(),
    }))
}
