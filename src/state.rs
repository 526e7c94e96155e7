//! Shared application state for Axum handlers.
//!
//! - **Gate**: the request gate shared by the middleware layer
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! The only background work is the limiter sweep, owned by the gate's
//! `TaskTracker` and `CancellationToken`. Call `shutdown()` to stop it
//! before application exit.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::gate::Gate;
use crate::gate::limiter::{Clock, SystemClock};
use crate::gate::logger::{LogSink, RecordEncoding, TracingSink};
use crate::identity::{IdentityProvider, StaticTokenProvider};

/// Shared application state for Axum handlers.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub gate: Arc<Gate>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    /// Build state with the default collaborators: a [`StaticTokenProvider`]
    /// from `IDENTITY_TOKENS`, a [`TracingSink`] and the system clock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the token table or rate limit
    /// settings are invalid.
    pub fn new(config: Config) -> AppResult<Self> {
        let provider = StaticTokenProvider::parse(&config.identity_tokens)?;
        if provider.is_empty() {
            info!("No IDENTITY_TOKENS configured, every request is anonymous");
        } else {
            info!(tokens = provider.len(), "Static identity tokens loaded");
        }

        let sink = TracingSink::new(RecordEncoding::for_environment(config.environment));

        Self::with_components(config, Arc::new(provider), Arc::new(sink), Arc::new(SystemClock))
    }

    /// Build state with injected collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings are invalid.
    pub fn with_components(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let gate = Gate::from_config(&config, provider, sink, clock)?;

        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            started_at: Instant::now(),
        })
    }

    /// Gracefully stop background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        self.gate.shutdown().await;
        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
