//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers, answers preflights
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │       Gate       │ ← 429 / 307, security headers, request record
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `/health`, `/ready` - Health checks (public)
//! - `/api/me` - Caller identity (protected)
//! - anything else - Placeholder acknowledgement, classified by the gate

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::GateLayer;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    info!(
        environment = %config.environment,
        max_requests = config.rate_limit_max_requests,
        window_secs = config.rate_limit_window.as_secs(),
        rules = state.gate.classifier().rules().len(),
        static_passthrough = config.static_asset_passthrough,
        "Request gate configured"
    );

    let cors = build_cors_layer(&config.cors_allowed_origins);
    let gate = GateLayer::new(state.gate.clone());

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/me", get(handlers::me))
        .fallback(handlers::acknowledge)
        // Applied bottom to top: the last layer added runs first
        .layer(gate)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
