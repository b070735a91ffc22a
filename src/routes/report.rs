//! Periodic field report, standalone insights and the plant health tally.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::AppError;
use crate::error::Error;
use crate::models::HealthTally;
use crate::report::{Insights, Report};
use crate::state::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/report", get(handler))
        .route("/insights", get(insights))
        .route("/plant-stats", get(plant_stats))
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    months: Option<String>,
}

fn parse_months(raw: Option<&str>) -> Result<u32, Error> {
    match raw.map(str::trim) {
        None | Some("") => Ok(1),
        Some(m) => m
            .parse()
            .map_err(|_| Error::InvalidInput(format!("months must be a positive integer, got '{m}'"))),
    }
}

/// Handle `GET /report?months=N`. `N` defaults to 1; 0 is rejected.
async fn handler(
    Query(params): Query<ReportParams>,
    State(state): State<AppState>,
) -> Result<Json<Report>, AppError> {
    // ---
    let months = parse_months(params.months.as_deref())?;
    info!("GET /report - compiling {} month(s)", months);
    Ok(Json(state.reports.compile(months).await?))
}

/// Handle `GET /insights`: narrative over the last six months.
async fn insights(State(state): State<AppState>) -> Result<Json<Insights>, AppError> {
    info!("GET /insights");
    Ok(Json(state.reports.insights().await?))
}

async fn plant_stats(State(state): State<AppState>) -> Result<Json<HealthTally>, AppError> {
    Ok(Json(state.reports.health_tally().await?))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_months() {
        // ---
        assert_eq!(parse_months(None).unwrap(), 1);
        assert_eq!(parse_months(Some("")).unwrap(), 1);
        assert_eq!(parse_months(Some(" 6 ")).unwrap(), 6);
        assert_eq!(parse_months(Some("0")).unwrap(), 0);
        assert!(parse_months(Some("-1")).is_err());
        assert!(parse_months(Some("six")).is_err());
    }
}
