//! # Taskboard Gate
//!
//! Request-gating middleware for the taskboard application, on Axum:
//!
//! - **Route classification**: every path maps to exactly one category
//!   (public, webhook, admin, protected, default)
//! - **Rate limiting**: fixed-window counters keyed by client IP or principal
//! - **Access control**: sign-in and insufficient-access redirects backed by a
//!   pluggable identity provider
//! - **Security headers**: CSP, HSTS (production), framing and referrer policy
//! - **Request records**: one structured record per gated request
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Trace → CORS → Gate)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gate: Classifier → Identity → Limiter → Access → Headers   │
//! │        → RequestLogger                                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, ready, /api/me, fallback)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskboard_gate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Identity Tokens
//!
//! The binary resolves identities from a static token table:
//! ```bash
//! IDENTITY_TOKENS="tok-ada=ada|admin" cargo run
//! curl -H 'Authorization: Bearer tok-ada' localhost:3000/admin/users
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::{Config, Environment, LogFormat};
pub use error::{AppError, AppResult, Rejection};
pub use gate::Gate;
pub use identity::{Identity, IdentityProvider, StaticTokenProvider};
pub use routes::build_router;
pub use state::AppState;
