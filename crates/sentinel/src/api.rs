//! HTTP API for reading ingestion, pond queries, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use prometheus::{Encoder, TextEncoder};
use sentinel_lib::{
    ComponentStatus, Engine, EngineMetrics, Granularity, HealthRegistry, PondId, Reading,
    RejectionReason, SensorType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Deliveries returned when no limit is given
const DEFAULT_DELIVERY_LIMIT: usize = 20;
const MAX_DELIVERY_LIMIT: usize = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            health_registry: engine.health_registry().clone(),
            metrics: EngineMetrics::new(),
            engine,
        }
    }
}

/// Errors returned by the API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("reading rejected: {0}")]
    Rejected(#[from] RejectionReason),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Rejected(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                reason.code().to_string(),
                reason.to_string(),
            ),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "bad_request".to_string(), message.clone())
            }
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found".to_string(),
                format!("{} not found", resource),
            ),
            ApiError::Internal(message) => {
                error!(error = %message, "Internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal".to_string(),
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { code, message })).into_response()
    }
}

fn parse_sensor(sensor: &str) -> Result<SensorType, ApiError> {
    sensor
        .parse()
        .map_err(|e: sentinel_lib::UnknownSensorType| ApiError::BadRequest(e.to_string()))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Ingest one reading; 202 with the ingest report or 422 with the rejection
async fn ingest_reading(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<Reading>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.engine.ingest(reading).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

async fn pond_health(
    State(state): State<Arc<AppState>>,
    Path(pond_id): Path<PondId>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .get_health_score(pond_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("health score for pond {}", pond_id)))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub since: Option<DateTime<Utc>>,
}

async fn pond_alerts(
    State(state): State<Arc<AppState>>,
    Path(pond_id): Path<PondId>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let since = query
        .since
        .unwrap_or_else(|| state.engine.now() - Duration::hours(24));
    Json(state.engine.get_recent_alerts(pond_id, since))
}

async fn detector_state(
    State(state): State<Arc<AppState>>,
    Path((pond_id, sensor)): Path<(PondId, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let sensor_type = parse_sensor(&sensor)?;
    state
        .engine
        .get_active_detector_state(pond_id, sensor_type)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("detector state for pond {} {}", pond_id, sensor_type))
        })
}

#[derive(Debug, Deserialize)]
pub struct BucketsQuery {
    pub granularity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Buckets of one series; defaults to the last day of hours or the last 30 days
async fn aggregate_buckets(
    State(state): State<Arc<AppState>>,
    Path((pond_id, sensor)): Path<(PondId, String)>,
    Query(query): Query<BucketsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sensor_type = parse_sensor(&sensor)?;
    let granularity = match query.granularity.as_deref() {
        Some(raw) => raw.parse::<Granularity>().map_err(ApiError::BadRequest)?,
        None => Granularity::Hour,
    };

    let to = query.to.unwrap_or_else(|| state.engine.now());
    let from = query.from.unwrap_or_else(|| match granularity {
        Granularity::Hour => to - Duration::hours(24),
        Granularity::Day => to - Duration::days(30),
    });
    if from > to {
        return Err(ApiError::BadRequest(format!(
            "from {} is after to {}",
            from, to
        )));
    }

    Ok(Json(state.engine.get_aggregate_buckets(
        pond_id,
        sensor_type,
        granularity,
        from,
        to,
    )))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    pub limit: Option<usize>,
}

async fn pond_deliveries(
    State(state): State<Arc<AppState>>,
    Path(pond_id): Path<PondId>,
    Query(query): Query<DeliveriesQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DELIVERY_LIMIT)
        .min(MAX_DELIVERY_LIMIT);
    Json(state.engine.recent_deliveries(pond_id, limit))
}

async fn fallback() -> ApiError {
    warn!("Request for unknown route");
    ApiError::NotFound("route".to_string())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/readings", post(ingest_reading))
        .route("/v1/ponds/:pond_id/health", get(pond_health))
        .route("/v1/ponds/:pond_id/alerts", get(pond_alerts))
        .route("/v1/ponds/:pond_id/deliveries", get(pond_deliveries))
        .route(
            "/v1/ponds/:pond_id/sensors/:sensor/detector",
            get(detector_state),
        )
        .route(
            "/v1/ponds/:pond_id/sensors/:sensor/buckets",
            get(aggregate_buckets),
        )
        .fallback(fallback)
        .with_state(state)
}

/// Start the API server and stop accepting requests on shutdown
pub async fn serve(
    addr: String,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
