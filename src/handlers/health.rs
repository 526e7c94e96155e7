//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with gate details
//! - `GET /ready` - Kubernetes-compatible readiness check
//!
//! Both are public routes in the default table, so health checks are rate limited
//! per IP like any other public request but never need credentials.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK; `status` is `draining` once shutdown has begun.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "environment": "production",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "rate_limit_entries": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.gate.is_shutting_down() {
        "draining"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        environment: state.config.environment.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit_entries: state.gate.rate_limiter().len(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes readiness checks.
///
/// Returns 503 once shutdown has begun so the load balancer stops routing here.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.gate.is_shutting_down() {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        Ok(StatusCode::OK)
    }
}
