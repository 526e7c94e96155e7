//! The request gate: per-request classification, rate limiting, access
//! control, security headers and request records.
//!
//! # Pipeline
//!
//! ```text
//! Classify → [resolve identity] → RateLimitCheck → [AuthCheck] → HeaderAttach → Log → Respond
//!                                       ↓                ↓
//!                                      429           307 redirect
//! ```
//!
//! Rejections skip straight to `HeaderAttach → Log → Respond`, so every
//! response carries the security headers and every request yields one record.
//!
//! [`Gate::evaluate`] runs everything up to the decision and returns an
//! [`Evaluation`]. The tower middleware then forwards or rejects, applies the
//! evaluated headers, and calls [`Gate::record`] once the final status is
//! known.

pub mod access;
pub mod classifier;
pub mod headers;
pub mod limiter;
pub mod logger;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, Rejection};
use crate::identity::{Identity, IdentityProvider, resolve_with_timeout};
use crate::metrics;
use crate::middleware::ip::{TrustedProxies, extract_client_ip};
use crate::middleware::request_id::generate_request_id;

use access::{AccessGate, AccessOutcome};
use classifier::{Category, RouteClassifier};
use headers::{HeaderComposer, SecurityHeaderSet, X_REQUEST_ID, rate_limit_headers};
use limiter::{Clock, RateLimitDecision, RateLimiter};
use logger::{GateDecision, LogSink, RequestRecord, log_request};

/// Everything the gate decided about one request.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub user_agent: Option<String>,
    pub category: Category,
    /// Rate limit key, `ip:<addr>` or `user:<principal>`.
    pub identifier: String,
    pub client_ip: String,
    pub identity: Option<Identity>,
    pub rate_limit: RateLimitDecision,
    /// `None` when the request may be forwarded.
    pub rejection: Option<Rejection>,
    /// Security, rate-limit and request-id headers for the response.
    pub headers: SecurityHeaderSet,
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn decision(&self) -> GateDecision {
        self.rejection
            .as_ref()
            .map_or(GateDecision::Allowed, Rejection::decision)
    }

    /// Build the request record for the final response status.
    pub fn to_record(&self, status: StatusCode) -> RequestRecord {
        let identity = self.identity.as_ref();
        RequestRecord {
            request_id: self.request_id.clone(),
            timestamp: self.timestamp,
            method: self.method.clone(),
            path: self.path.clone(),
            category: self.category,
            identifier: self.identifier.clone(),
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            principal_id: identity.map(|i| i.principal_id.clone()),
            session_id: identity.and_then(|i| i.session_id.clone()),
            org_id: identity.and_then(|i| i.org_id.clone()),
            roles: identity
                .map(|i| i.roles.iter().cloned().collect())
                .unwrap_or_default(),
            decision: self.decision(),
            status: status.as_u16(),
        }
    }
}

/// Rate-limit key for a request.
fn limiter_key(identity: Option<&Identity>, client_ip: &str) -> (&'static str, String) {
    match identity {
        Some(identity) => ("user", format!("user:{}", identity.principal_id)),
        None => ("ip", format!("ip:{client_ip}")),
    }
}

/// Shared gate state. One instance serves every request.
pub struct Gate {
    classifier: RouteClassifier,
    limiter: Arc<RateLimiter>,
    access: AccessGate,
    headers: HeaderComposer,
    provider: Arc<dyn IdentityProvider>,
    identity_timeout: Duration,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
    static_passthrough: bool,
    trusted_proxies: TrustedProxies,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("rules", &self.classifier.rules().len())
            .field("max_requests", &self.limiter.max_requests())
            .field("window", &self.limiter.window())
            .field("identity_timeout", &self.identity_timeout)
            .field("static_passthrough", &self.static_passthrough)
            .field("trusted_proxies", &!self.trusted_proxies.is_empty())
            .finish_non_exhaustive()
    }
}

impl Gate {
    /// Assemble a gate from configuration and injected collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings are invalid.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn IdentityProvider>,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let limiter = RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window)
            .map_err(|e| AppError::ConfigError(format!("Invalid rate limit: {e}")))?;

        Ok(Self::new(
            RouteClassifier::from_groups(&config.routes),
            limiter,
            AccessGate::new(
                config.sign_in_url.clone(),
                config.unauthorized_url.clone(),
                config.admin_roles.clone(),
            ),
            HeaderComposer::new(config.environment, &config.csp),
            provider,
            config.identity_timeout,
            sink,
            clock,
        )
        .with_static_passthrough(config.static_asset_passthrough)
        .with_trusted_proxies(TrustedProxies::new(&config.trusted_proxies)))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: RouteClassifier,
        limiter: RateLimiter,
        access: AccessGate,
        headers: HeaderComposer,
        provider: Arc<dyn IdentityProvider>,
        identity_timeout: Duration,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier,
            limiter: Arc::new(limiter),
            access,
            headers,
            provider,
            identity_timeout,
            sink,
            clock,
            static_passthrough: true,
            trusted_proxies: TrustedProxies::default(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_static_passthrough(mut self, enabled: bool) -> Self {
        self.static_passthrough = enabled;
        self
    }

    /// Proxies whose forwarding headers name the client.
    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxies) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Whether a path skips the gate entirely.
    pub fn is_passthrough(&self, path: &str) -> bool {
        self.static_passthrough && self.classifier.is_passthrough(path)
    }

    /// Evaluate a request up to the forward/reject decision.
    ///
    /// Never fails: provider errors become "no identity" and the limiter
    /// cannot error.
    pub async fn evaluate(&self, parts: &Parts) -> Evaluation {
        let started = Instant::now();
        let now_millis = self.clock.now_millis();
        let now = now_millis / 1000;

        let path = parts.uri.path().to_string();
        let category = self.classifier.classify(&path);
        if category == Category::Default {
            debug!(path = %path, "No route rule matched, treating as protected");
        }

        let client_ip = extract_client_ip(parts, &self.trusted_proxies).into_owned();

        // Public and webhook routes never consult the provider
        let identity = if category.requires_identity() {
            self.resolve_identity(parts).await
        } else {
            None
        };

        let (scope, identifier) = limiter_key(identity.as_ref(), &client_ip);
        let rate_limit = self.limiter.check(&identifier, now);
        self.schedule_sweep(now);

        let rejection = if rate_limit.allowed {
            let access =
                self.access
                    .decide(category, identity.as_ref(), &path, self.provider.as_ref());
            match (access.outcome, access.redirect_target) {
                (AccessOutcome::Allow, _) => None,
                (AccessOutcome::Unauthenticated, target) => Some(Rejection::Unauthenticated {
                    location: target.unwrap_or_default(),
                }),
                (AccessOutcome::Unauthorized, target) => Some(Rejection::Unauthorized {
                    location: target.unwrap_or_default(),
                }),
            }
        } else {
            metrics::record_rate_limited(scope);
            Some(Rejection::RateLimitExceeded {
                retry_after: rate_limit.retry_after(now),
            })
        };

        let request_id = generate_request_id(now_millis);
        let mut headers = self.headers.compose(category);
        headers.extend(rate_limit_headers(&rate_limit, now));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.push(X_REQUEST_ID.clone(), value);
        }

        metrics::record_decision_duration(category.as_str(), started.elapsed().as_secs_f64());

        let timestamp = i64::try_from(now_millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Evaluation {
            request_id,
            timestamp,
            method: parts.method.to_string(),
            path,
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            category,
            identifier,
            client_ip,
            identity,
            rate_limit,
            rejection,
            headers,
        }
    }

    /// Emit the request record and decision metrics.
    pub fn record(&self, evaluation: &Evaluation, status: StatusCode) {
        let record = evaluation.to_record(status);
        metrics::record_request(record.category.as_str(), record.decision.as_str());
        log_request(self.sink.as_ref(), &record);
    }

    async fn resolve_identity(&self, parts: &Parts) -> Option<Identity> {
        match resolve_with_timeout(self.provider.as_ref(), parts, self.identity_timeout).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, path = %parts.uri.path(), "Identity resolution failed, continuing anonymous");
                metrics::record_identity_failure(e.reason());
                None
            }
        }
    }

    /// Purge expired limiter entries off the request path, at most once per window.
    fn schedule_sweep(&self, now: u64) {
        if self.cancellation_token.is_cancelled() || !self.limiter.sweep_due(now) {
            return;
        }

        let limiter = Arc::clone(&self.limiter);
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let removed = limiter.purge_expired(now);
            let remaining = limiter.len();
            metrics::set_rate_limit_entries(remaining);
            debug!(removed, remaining, "Purged expired rate limit entries");
        });
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop scheduling sweeps and wait for in-flight ones.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("Gate background tasks stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::gate::limiter::ManualClock;
    use crate::gate::logger::CapturingSink;
    use crate::identity::StaticTokenProvider;
    use axum::http::Request;

    const T0: u64 = 1_700_000_000;

    fn gate(max: u32, sink: Arc<CapturingSink>, clock: Arc<ManualClock>) -> Gate {
        let config = Config {
            rate_limit_max_requests: max,
            ..Config::default()
        };
        let provider = StaticTokenProvider::parse("tok-admin=ada|admin;tok-member=bob|member").unwrap();
        Gate::from_config(&config, Arc::new(provider), sink, clock).unwrap()
    }

    fn parts(path: &str, token: Option<&str>) -> Parts {
        let mut builder = Request::builder()
            .uri(path)
            .header("x-forwarded-for", "203.0.113.9")
            .header("user-agent", "gate-tests");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_public_request_keyed_by_ip() {
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::new(ManualClock::at_secs(T0)));
        let eval = gate.evaluate(&parts("/api/public/ping", None)).await;

        assert!(eval.is_allowed());
        assert_eq!(eval.category, Category::Public);
        assert_eq!(eval.identifier, "ip:203.0.113.9");
        assert_eq!(eval.rate_limit.remaining, 99);
        assert!(eval.identity.is_none());
        assert!(eval.request_id.starts_with(&format!("req_{}", T0 * 1000)));
    }

    #[tokio::test]
    async fn test_protected_request_keyed_by_principal() {
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::new(ManualClock::at_secs(T0)));
        let eval = gate.evaluate(&parts("/dashboard", Some("tok-member"))).await;

        assert!(eval.is_allowed());
        assert_eq!(eval.identifier, "user:bob");
    }

    #[tokio::test]
    async fn test_public_route_ignores_credentials() {
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::new(ManualClock::at_secs(T0)));
        let eval = gate.evaluate(&parts("/pricing", Some("tok-member"))).await;

        assert!(eval.identity.is_none());
        assert_eq!(eval.identifier, "ip:203.0.113.9");
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_access_decision() {
        let gate = gate(1, Arc::new(CapturingSink::new()), Arc::new(ManualClock::at_secs(T0)));
        let first = gate.evaluate(&parts("/dashboard", None)).await;
        assert_eq!(first.decision(), GateDecision::Unauthenticated);

        let second = gate.evaluate(&parts("/dashboard", None)).await;
        assert_eq!(second.decision(), GateDecision::RateLimited);
        assert_eq!(
            second.rejection,
            Some(Rejection::RateLimitExceeded { retry_after: 60 })
        );
    }

    #[tokio::test]
    async fn test_admin_outcomes() {
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::new(ManualClock::at_secs(T0)));

        let member = gate.evaluate(&parts("/admin/users", Some("tok-member"))).await;
        assert_eq!(
            member.rejection,
            Some(Rejection::Unauthorized {
                location: "/?error=unauthorized".to_string()
            })
        );

        let admin = gate.evaluate(&parts("/admin/users", Some("tok-admin"))).await;
        assert!(admin.is_allowed());
    }

    #[tokio::test]
    async fn test_record_carries_identity_and_status() {
        let sink = Arc::new(CapturingSink::new());
        let gate = gate(100, Arc::clone(&sink), Arc::new(ManualClock::at_secs(T0)));

        let eval = gate.evaluate(&parts("/boards/7", Some("tok-member"))).await;
        gate.record(&eval, StatusCode::OK);

        let record = sink.last().unwrap();
        assert_eq!(record.principal_id.as_deref(), Some("bob"));
        assert_eq!(record.roles, vec!["member"]);
        assert_eq!(record.user_agent.as_deref(), Some("gate-tests"));
        assert_eq!(record.decision, GateDecision::Allowed);
        assert_eq!(record.status, 200);
        assert_eq!(record.timestamp.timestamp(), i64::try_from(T0).unwrap());
    }

    #[tokio::test]
    async fn test_sweep_purges_stale_entries() {
        let clock = Arc::new(ManualClock::at_secs(T0));
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::clone(&clock));

        gate.evaluate(&parts("/", None)).await;
        clock.advance(Duration::from_secs(120));

        let mut other = parts("/", None);
        other.headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        gate.evaluate(&other).await;

        gate.shutdown().await;
        assert_eq!(gate.rate_limiter().len(), 1);
        assert!(gate.is_shutting_down());
    }

    #[test]
    fn test_passthrough_toggle() {
        let clock = Arc::new(ManualClock::at_secs(T0));
        let gate = gate(100, Arc::new(CapturingSink::new()), Arc::clone(&clock));
        assert!(gate.is_passthrough("/_next/static/app.js"));
        assert!(!gate.is_passthrough("/api/data.json"));
        assert!(!gate.is_passthrough("/dashboard/export.json"));

        let gate = gate.with_static_passthrough(false);
        assert!(!gate.is_passthrough("/_next/static/app.js"));
    }
}
