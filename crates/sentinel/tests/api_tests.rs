//! Integration tests for the sentinel API endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use pond_sentinel::api::{create_router, AppState};
use sentinel_lib::{
    config::DetectorParams, Component, Engine, EngineConfig, HealthRegistry, ManualClock,
    MemoryStore, SensorType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
}

fn engine_config() -> EngineConfig {
    let detectors: BTreeMap<SensorType, DetectorParams> = SensorType::ALL
        .iter()
        .map(|&sensor| {
            (
                sensor,
                DetectorParams {
                    delta: 0.5,
                    lambda: 5.0,
                },
            )
        })
        .collect();
    EngineConfig::new(detectors)
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::with_all_components().await;
    let engine = Engine::builder(engine_config())
        .store(Arc::new(MemoryStore::new()))
        .clock(Arc::new(ManualClock::new(t0())))
        .health(health_registry)
        .instance("api-test")
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(Arc::new(engine)));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_reading(app: Router, reading: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/readings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(reading.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn reading(pond_id: u32, sensor: &str, value: f64, unit: &str) -> serde_json::Value {
    serde_json::json!({
        "pond_id": pond_id,
        "sensor_type": sensor,
        "value": value,
        "unit": unit,
        "timestamp": t0().to_rfc3339(),
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["store"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(Component::Store, "save_alert failed")
        .await;

    let (status, health) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(Component::Dispatcher, "Dispatch worker stopped")
        .await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pond_sentinel_readings_ingested_total"));
}

#[tokio::test]
async fn test_accepted_reading_returns_report() {
    let (app, _state) = setup_test_app().await;

    let (status, report) = post_reading(app, reading(1, "temperature", 26.0, "°C")).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(report["persisted"], true);
    assert_eq!(report["series"]["pond_id"], 1);
    assert_eq!(report["series"]["sensor_type"], "temperature");
    assert!(report["change_point"].is_null());
    assert_eq!(report["health"]["pond_id"], 1);
}

#[tokio::test]
async fn test_rejected_reading_returns_422_with_code() {
    let (app, state) = setup_test_app().await;

    let (status, error) = post_reading(app, reading(1, "dissolved_oxygen", 7.5, "°C")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "unit_mismatch");
    assert!(error["message"].as_str().unwrap().contains("dissolved_oxygen"));
    assert!(state.engine.get_health_score(1).is_none());
}

#[tokio::test]
async fn test_pond_health_unknown_then_scored() {
    let (app, _state) = setup_test_app().await;

    let (status, error) = get(app.clone(), "/v1/ponds/9/health").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "not_found");

    post_reading(app.clone(), reading(9, "ph", 7.4, "pH")).await;
    let (status, health) = get(app, "/v1/ponds/9/health").await;

    assert_eq!(status, StatusCode::OK);
    let score = health["score"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&score));
}

#[tokio::test]
async fn test_limit_breach_is_listed_in_alerts() {
    let (app, _state) = setup_test_app().await;

    let (status, report) = post_reading(app.clone(), reading(3, "temperature", 36.0, "°C")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(!report["alerts"].as_array().unwrap().is_empty());

    let (status, alerts) = get(app.clone(), "/v1/ponds/3/alerts").await;
    assert_eq!(status, StatusCode::OK);
    let alerts = alerts.as_array().unwrap();
    assert!(alerts
        .iter()
        .any(|a| a["kind"] == "limit_breach" && a["severity"] == "critical"));

    let (_, other) = get(app, "/v1/ponds/4/alerts").await;
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_alerts_since_filters_older_alerts() {
    let (app, _state) = setup_test_app().await;
    post_reading(app.clone(), reading(3, "temperature", 36.0, "°C")).await;

    let (status, alerts) = get(app, "/v1/ponds/3/alerts?since=2024-06-01T07:00:00Z").await;

    assert_eq!(status, StatusCode::OK);
    assert!(alerts.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_detector_state_endpoint() {
    let (app, _state) = setup_test_app().await;

    let (status, error) = get(app.clone(), "/v1/ponds/2/sensors/salinity/detector").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "bad_request");

    let (status, _) = get(app.clone(), "/v1/ponds/2/sensors/temperature/detector").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    post_reading(app.clone(), reading(2, "temperature", 25.0, "°C")).await;
    let (status, state) = get(app, "/v1/ponds/2/sensors/temperature/detector").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["sample_count"], 1);
    assert_eq!(state["mean"], 25.0);
}

#[tokio::test]
async fn test_aggregate_buckets_endpoint() {
    let (app, _state) = setup_test_app().await;
    post_reading(app.clone(), reading(5, "ammonia", 0.1, "mg/L")).await;
    post_reading(app.clone(), reading(5, "ammonia", 0.3, "mg/L")).await;

    let (status, buckets) = get(
        app.clone(),
        "/v1/ponds/5/sensors/ammonia/buckets?granularity=hour",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let buckets = buckets.as_array().unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0]["count"], 2);
    assert_eq!(buckets[0]["bucket_start"], "2024-06-01T06:00:00Z");

    let (status, _) = get(
        app.clone(),
        "/v1/ponds/5/sensors/ammonia/buckets?granularity=week",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        app,
        "/v1/ponds/5/sensors/ammonia/buckets?from=2024-06-02T00:00:00Z&to=2024-06-01T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deliveries_empty_without_worker() {
    let (app, _state) = setup_test_app().await;

    let (status, deliveries) = get(app, "/v1/ponds/1/deliveries?limit=5").await;

    assert_eq!(status, StatusCode::OK);
    assert!(deliveries.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let (app, _state) = setup_test_app().await;

    let (status, error) = get(app, "/v2/ponds").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "not_found");
}
