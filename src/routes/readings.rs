//! Reading ingestion, latest values and calendar aggregates.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{parse_metric, AppError};
use crate::aggregate::AggregateQuery;
use crate::error::Error;
use crate::models::{Bucket, Granularity, MetricType, Reading};
use crate::state::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/readings/latest", get(latest))
        .route("/readings/{metric}", post(ingest))
        .route("/readings/{metric}/aggregates", get(aggregates))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    sensor_id: String,
    value: f64,
    unit: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

async fn ingest(
    Path(metric): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> Result<(StatusCode, Json<Reading>), AppError> {
    // ---
    let metric = parse_metric(&metric)?;
    let sensor_id = body.sensor_id.trim();
    if sensor_id.is_empty() {
        return Err(Error::InvalidInput("sensor_id must not be empty".to_string()).into());
    }

    let mut reading = Reading::new(
        sensor_id,
        metric,
        body.value,
        body.timestamp.unwrap_or_else(Utc::now),
    );
    if let Some(unit) = body.unit.filter(|u| !u.trim().is_empty()) {
        reading.unit = unit;
    }

    state.stores.readings.append(&reading).await?;
    debug!(
        "POST /readings/{} - stored {}={} {}",
        metric, reading.sensor_id, reading.value, reading.unit
    );
    Ok((StatusCode::CREATED, Json(reading)))
}

#[derive(Debug, Serialize)]
struct LatestResponse {
    temperature: Vec<Reading>,
    humidity: Vec<Reading>,
}

async fn latest(State(state): State<AppState>) -> Result<Json<LatestResponse>, AppError> {
    // ---
    let temperature = state.stores.readings.latest(MetricType::Temperature).await?;
    let humidity = state.stores.readings.latest(MetricType::Humidity).await?;
    Ok(Json(LatestResponse {
        temperature,
        humidity,
    }))
}

/// Raw query string; parsed by hand so bad values get a JSON error body.
#[derive(Debug, Deserialize)]
struct AggregatesParams {
    start: Option<String>,
    end: Option<String>,
    granularity: Option<String>,
    sensor_id: Option<String>,
}

fn parse_date(name: &str, raw: Option<&str>) -> Result<NaiveDate, Error> {
    let raw = raw.ok_or_else(|| Error::InvalidInput(format!("{name} is required")))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("{name} '{raw}' is not YYYY-MM-DD: {e}")))
}

impl AggregatesParams {
    fn into_query(self, metric: MetricType) -> Result<AggregateQuery, Error> {
        // ---
        let granularity = match self.granularity.as_deref() {
            Some(g) => g.trim().parse()?,
            None => Granularity::Day,
        };
        Ok(AggregateQuery {
            metric,
            sensor_id: self
                .sensor_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            start: parse_date("start", self.start.as_deref())?,
            end: parse_date("end", self.end.as_deref())?,
            granularity,
        })
    }
}

async fn aggregates(
    Path(metric): Path<String>,
    Query(params): Query<AggregatesParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Bucket>>, AppError> {
    // ---
    let metric = parse_metric(&metric)?;
    let query = params.into_query(metric)?;
    info!(
        "GET /readings/{}/aggregates - {}..={} by {:?}",
        metric, query.start, query.end, query.granularity
    );

    let buckets = state.engine.aggregate(&query).await?;
    Ok(Json(buckets))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn params(start: &str, end: &str, granularity: Option<&str>) -> AggregatesParams {
        AggregatesParams {
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            granularity: granularity.map(str::to_string),
            sensor_id: Some(" ".to_string()),
        }
    }

    #[test]
    fn test_params_default_to_daily() {
        // ---
        let query = params("2025-03-01", "2025-03-02", None)
            .into_query(MetricType::Temperature)
            .unwrap();
        assert_eq!(query.granularity, Granularity::Day);
        assert!(query.sensor_id.is_none());
    }

    #[test]
    fn test_sensor_id_is_trimmed() {
        // ---
        let query = AggregatesParams {
            sensor_id: Some(" temp1 ".to_string()),
            ..params("2025-03-01", "2025-03-02", None)
        }
        .into_query(MetricType::Temperature)
        .unwrap();
        assert_eq!(query.sensor_id.as_deref(), Some("temp1"));
    }

    #[test]
    fn test_bad_params_are_invalid_input() {
        // ---
        let bad_date = params("03/01/2025", "2025-03-02", None).into_query(MetricType::Humidity);
        assert!(matches!(bad_date, Err(Error::InvalidInput(_))));

        let bad_granularity =
            params("2025-03-01", "2025-03-02", Some("week")).into_query(MetricType::Humidity);
        assert!(matches!(bad_granularity, Err(Error::InvalidInput(_))));

        let missing = AggregatesParams {
            start: None,
            end: None,
            granularity: None,
            sensor_id: None,
        }
        .into_query(MetricType::Humidity);
        assert!(matches!(missing, Err(Error::InvalidInput(_))));
    }
}
