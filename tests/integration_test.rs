use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use fieldstate::{
    routes, AggregationEngine, AnomalyBindings, AnomalySnapshot, AppState, Collector,
    CollectorIntervals, Deduplicator, DeviceStateSnapshot, Error, HealthTally, HealthTallySource,
    LocalFeed, Position, Reconciler, ReportCompiler, SensorRegistry, Stores, UnconfiguredNarrative,
    FALLBACK_NARRATIVE,
};

// ---

struct FixedTally;

#[async_trait]
impl HealthTallySource for FixedTally {
    async fn counts(&self) -> fieldstate::Result<HealthTally> {
        Ok(HealthTally {
            healthy: 5,
            unhealthy: 1,
            total: 6,
        })
    }
}

struct DownTally;

#[async_trait]
impl HealthTallySource for DownTally {
    async fn counts(&self) -> fieldstate::Result<HealthTally> {
        Err(Error::upstream("health tally", "connection refused"))
    }
}

struct Harness {
    app: Router,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Full router over an in-memory store, with collectors polling every 20ms.
fn harness_with(health: Arc<dyn HealthTallySource>) -> Harness {
    // ---
    let stores = Stores::memory();
    let anomaly_feed = LocalFeed::<AnomalySnapshot>::new();
    let device_feed = LocalFeed::<DeviceStateSnapshot>::new();
    let cancel = CancellationToken::new();

    let registry = SensorRegistry::new(
        AnomalyBindings::new([("soilmoist1", "soil_moisture"), ("temp1", "temperature")]),
        Some(Position {
            lat: 31.95,
            lng: 35.91,
        }),
        Default::default(),
    );
    let (reconciler, _task) =
        Reconciler::new(registry, Deduplicator::new(), &AnomalySnapshot::new())
            .spawn(cancel.clone());

    Collector::new(
        reconciler.clone(),
        Arc::clone(&stores.roster),
        Arc::clone(&stores.readings),
        Arc::new(anomaly_feed.clone()),
        Arc::new(device_feed.clone()),
        CollectorIntervals {
            roster: Duration::from_millis(20),
            readings: Duration::from_millis(20),
            resubscribe: Duration::from_millis(20),
        },
    )
    .start(&cancel);

    let engine = AggregationEngine::new(Arc::clone(&stores.readings));
    let reports = ReportCompiler::new(engine.clone(), health, Arc::new(UnconfiguredNarrative));

    let app = routes::router(AppState {
        stores,
        engine,
        reports,
        reconciler,
        anomaly_feed,
        device_feed,
    });
    Harness { app, cancel }
}

fn harness() -> Harness {
    harness_with(Arc::new(FixedTally))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    // ---
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, Some(body)).await
}

/// Retry `uri` until `check` accepts the body or a second has gone by.
async fn get_until(app: &Router, uri: &str, check: impl Fn(&Value) -> bool) -> Value {
    // ---
    let mut last = Value::Null;
    for _ in 0..100 {
        let (status, body) = get(app, uri).await;
        if status == StatusCode::OK && check(&body) {
            return body;
        }
        last = body;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition on {uri} never held, last body: {last}");
}

fn sensor<'a>(sensors: &'a Value, id: &str) -> Option<&'a Value> {
    sensors.as_array()?.iter().find(|s| s["id"] == id)
}

#[tokio::test]
async fn health_reports_ok() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn daily_aggregates_over_http() {
    // ---
    let h = harness();
    for (ts, value) in [
        ("2025-03-01T08:00:00Z", 10.0),
        ("2025-03-01T20:00:00Z", 20.0),
        ("2025-03-02T23:00:00Z", 30.0),
    ] {
        let (status, _) = post(
            &h.app,
            "/readings/temperature",
            json!({"sensor_id": "temp1", "value": value, "timestamp": ts}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = get(
        &h.app,
        "/readings/temperature/aggregates?start=2025-03-01&end=2025-03-02&granularity=day",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"bucket_key": "2025-03-01", "count": 2, "avg": 15.0, "min": 10.0, "max": 20.0},
            {"bucket_key": "2025-03-02", "count": 1, "avg": 30.0, "min": 30.0, "max": 30.0},
        ])
    );

    let (_, latest) = get(&h.app, "/readings/latest").await;
    assert_eq!(latest["temperature"][0]["value"], 30.0);
    assert_eq!(latest["temperature"][0]["unit"], "celsius");
    assert_eq!(latest["humidity"], json!([]));
}

#[tokio::test]
async fn caller_errors_are_json_400s() {
    // ---
    let h = harness();

    let (status, body) = get(
        &h.app,
        "/readings/humidity/aggregates?start=2025-03-05&end=2025-03-01",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid range"));

    let (status, _) = get(&h.app, "/readings/pressure/aggregates?start=2025-03-01&end=2025-03-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &h.app,
        "/readings/humidity",
        json!({"sensor_id": " ", "value": 12.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&h.app, "/report?months=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn roster_then_anomaly_flips_status_and_notifies_once() {
    // ---
    let h = harness();

    let (status, _) = post(&h.app, "/roster/humidity", json!({"sensor_id": "soilmoist1"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post(&h.app, "/roster/humidity", json!({"sensor_id": "soilmoist1"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let sensors = get_until(&h.app, "/sensors", |s| sensor(s, "soilmoist1").is_some()).await;
    let record = sensor(&sensors, "soilmoist1").unwrap();
    assert_eq!(record["status"], "normal");
    assert_eq!(record["type"], "humidity");
    assert_eq!(record["position_placeholder"], true);

    let (status, body) = post(&h.app, "/signals/anomaly", json!({"soil_moisture": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let sensors = get_until(&h.app, "/sensors", |s| {
        sensor(s, "soilmoist1").map(|r| r["status"] == "alert").unwrap_or(false)
    })
    .await;
    assert!(sensor(&sensors, "soilmoist1").is_some());

    let pending = get_until(&h.app, "/notifications", |n| {
        n.as_array().map(|a| !a.is_empty()).unwrap_or(false)
    })
    .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["subject"], "soil_moisture");
    assert_eq!(pending[0]["severity"], "warning");

    // Re-posting the same flag is not a transition
    let (_, body) = post(&h.app, "/signals/anomaly", json!({"soil_moisture": true})).await;
    assert_eq!(body["changed"], false);
    tokio::time::sleep(Duration::from_millis(60)).await;
    let (_, pending) = get(&h.app, "/notifications").await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, body) = call(&h.app, Method::DELETE, "/notifications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 1);
    let (_, pending) = get(&h.app, "/notifications").await;
    assert_eq!(pending, json!([]));
}

#[tokio::test]
async fn device_states_notify_and_skip_unknown_values() {
    // ---
    let h = harness();
    let (status, _) = post(
        &h.app,
        "/signals/devices",
        json!({"relay1": "on", "relay2": "dimmed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let pending = get_until(&h.app, "/notifications", |n| {
        n.as_array().map(|a| !a.is_empty()).unwrap_or(false)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    let (_, pending_later) = get(&h.app, "/notifications").await;
    assert_eq!(pending, pending_later);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["subject"], "relay1");
    assert_eq!(pending[0]["severity"], "info");
}

#[tokio::test]
async fn readings_create_sensors_and_positions_persist() {
    // ---
    let h = harness();
    let (status, _) = post(
        &h.app,
        "/readings/temperature",
        json!({"sensor_id": "temp7", "value": 24.5}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let sensors = get_until(&h.app, "/sensors", |s| sensor(s, "temp7").is_some()).await;
    let record = sensor(&sensors, "temp7").unwrap();
    assert_eq!(record["value"], 24.5);
    assert_eq!(record["status"], "normal");

    let (status, body) = call(
        &h.app,
        Method::PUT,
        "/sensors/temp7/position",
        Some(json!({"lat": 31.9, "lng": 35.8})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["known"], true);

    let (_, sensors) = get(&h.app, "/sensors").await;
    let record = sensor(&sensors, "temp7").unwrap();
    assert_eq!(record["position"], json!({"lat": 31.9, "lng": 35.8}));
    assert_eq!(record["position_placeholder"], false);

    let (status, _) = call(
        &h.app,
        Method::PUT,
        "/sensors/temp7/position",
        Some(json!({"lat": 123.0, "lng": 35.8})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&h.app, Method::DELETE, "/sensors/temp7/position", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, sensors) = get(&h.app, "/sensors").await;
    assert_eq!(sensor(&sensors, "temp7").unwrap()["position_placeholder"], true);

    let (status, _) = call(&h.app, Method::DELETE, "/sensors/ghost/position", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_falls_back_when_narrative_fails() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/report").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["narrative"], FALLBACK_NARRATIVE);
    assert_eq!(body["health_tally"]["total"], 6);
    assert_eq!(body["temperature_aggregates"], json!([]));
    assert_eq!(body["meta"]["period_label"], "1 month(s)");
}

#[tokio::test]
async fn report_fails_when_tally_is_down() {
    // ---
    let h = harness_with(Arc::new(DownTally));
    let (status, body) = get(&h.app, "/report?months=3").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("health tally"));
}

#[tokio::test]
async fn insights_fall_back_and_plant_stats_pass_through() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/insights").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["narrative"], FALLBACK_NARRATIVE);
    assert!(body["period"]["start"].is_string());

    let (status, body) = get(&h.app, "/plant-stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "healthy": 5, "unhealthy": 1, "total": 6 }));

    let down = harness_with(Arc::new(DownTally));
    let (status, _) = get(&down.app, "/plant-stats").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    // Insights never consult the tally
    let (status, _) = get(&down.app, "/insights").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn config_loads_from_lookup() {
    // ---
    let cfg = assert_ok!(fieldstate::config::load_from(|name| match name {
        "FIELD_CENTER" => Some("31.95,35.91".to_string()),
        _ => None,
    }));
    assert!(cfg.db_url.is_none());
    assert_eq!(cfg.bindings().sensors_for("soil_moisture"), vec!["soilmoist1"]);

    assert_err!(fieldstate::config::load_from(|name| match name {
        "READING_POLL_SECS" => Some("0".to_string()),
        _ => None,
    }));
}
