//! HTTP gateway: merges the per-concern subrouters and maps library errors
//! onto status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};

use crate::error::Error;
use crate::state::AppState;

mod health;
mod notifications;
mod readings;
mod report;
mod sensors;
mod signals;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(sensors::router())
        .merge(signals::router())
        .merge(notifications::router())
        .merge(report::router())
        .merge(health::router())
        .with_state(state)
}

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError(e)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRange { .. } | Error::InvalidPeriod(_) | Error::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Parse a `{metric}` path segment.
fn parse_metric(raw: &str) -> Result<crate::models::MetricType, AppError> {
    Ok(raw.parse()?)
}
