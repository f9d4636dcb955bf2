//! Health check and metrics handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};

use crate::handlers::{success_response, HandlerResult};
use crate::health::SystemHealth;
use crate::server::ServerState;

/// Basic health check endpoint
pub async fn health_check(State(state): State<ServerState>) -> HandlerResult<Value> {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);

    success_response(json!({
        "status": "healthy",
        "service": "ai-router",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs,
        "registry": state.registry.stats(),
        "telemetry": state.telemetry.health(),
    }))
}

/// Aggregate health of every registered provider
pub async fn system_health(State(state): State<ServerState>) -> HandlerResult<SystemHealth> {
    success_response(state.health.get_system_health())
}

/// Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<ServerState>) -> Response {
    match state.telemetry.render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics are disabled").into_response(),
    }
}
