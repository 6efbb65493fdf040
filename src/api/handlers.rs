use crate::api::AppState;
use crate::circuit_breaker::CircuitState;
use crate::error::{AppError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Ready when the consumer loop is active and the publish breaker is not open
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let consumer_running = match &state.consumer {
        Some(consumer) => consumer.is_running().await,
        None => false,
    };
    let breaker_state = state.publisher.breaker().state();
    let ready = consumer_running && breaker_state != CircuitState::Open;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            consumer_running,
            publish_circuit: breaker_state.to_string(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub consumer_running: bool,
    pub publish_circuit: String,
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let metrics = state
        .metrics
        .as_ref()
        .ok_or_else(|| AppError::NotFound("metrics are disabled".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.gather_text(),
    ))
}
