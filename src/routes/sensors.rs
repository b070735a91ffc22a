//! Sensor snapshot, roster registration and explicit repositioning.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_metric, AppError};
use crate::error::Error;
use crate::models::{MetricType, Position, SensorRecord};
use crate::state::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors", get(list))
        .route("/roster/{metric}", get(roster).post(register))
        .route(
            "/sensors/{id}/position",
            put(set_position).delete(reset_position),
        )
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<SensorRecord>>, AppError> {
    Ok(Json(state.reconciler.snapshot_all().await?))
}

async fn roster(
    Path(metric): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    let metric = parse_metric(&metric)?;
    Ok(Json(state.stores.roster.list_sensors(metric).await?))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    sensor_id: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    metric: MetricType,
    sensor_id: String,
}

/// Add a sensor id to the roster. The next roster poll reconciles it.
async fn register(
    Path(metric): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    // ---
    let metric = parse_metric(&metric)?;
    let sensor_id = body.sensor_id.trim().to_string();
    if sensor_id.is_empty() {
        return Err(Error::InvalidInput("sensor_id must not be empty".to_string()).into());
    }

    state.stores.roster.add_sensor(metric, &sensor_id).await?;
    info!("POST /roster/{} - registered {}", metric, sensor_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { metric, sensor_id })))
}

#[derive(Debug, Serialize)]
struct PositionResponse {
    sensor_id: String,
    position: Position,
    /// False when the sensor has not been discovered yet; the position
    /// applies once it is.
    known: bool,
}

async fn set_position(
    Path(sensor_id): Path<String>,
    State(state): State<AppState>,
    Json(position): Json<Position>,
) -> Result<Json<PositionResponse>, AppError> {
    // ---
    position.validate()?;

    // Persist first so a restart never loses an acknowledged move
    state.stores.positions.save(&sensor_id, position).await?;
    let known = state.reconciler.set_position(&sensor_id, position).await?;
    info!(
        "PUT /sensors/{}/position - {},{} (known: {})",
        sensor_id, position.lat, position.lng, known
    );

    Ok(Json(PositionResponse {
        sensor_id,
        position,
        known,
    }))
}

async fn reset_position(
    Path(sensor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    // ---
    let persisted = state.stores.positions.remove(&sensor_id).await?;
    let known = state.reconciler.reset_position(&sensor_id).await?;
    if !persisted && !known {
        return Err(Error::NotFound(format!("sensor '{sensor_id}'")).into());
    }
    info!("DELETE /sensors/{}/position - placeholder restored", sensor_id);
    Ok(StatusCode::NO_CONTENT)
}
