//! Security and rate-limit response headers.
//!
//! # Security Headers
//!
//! [`HeaderComposer::compose`] is a pure function of the category and the
//! composer's configuration (environment + CSP directive sources). Two requests
//! in the same category get byte-identical sets.
//!
//! | Header                      | When                         |
//! |-----------------------------|------------------------------|
//! | `X-Frame-Options`           | always                       |
//! | `X-Content-Type-Options`    | always                       |
//! | `Referrer-Policy`           | always                       |
//! | `Permissions-Policy`        | always                       |
//! | `Content-Security-Policy`   | always                       |
//! | `Strict-Transport-Security` | production only              |
//! | `Cache-Control`             | categories needing identity  |
//!
//! # Rate Limit Headers
//!
//! [`rate_limit_headers`] renders the limiter decision: `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset` on every gated response,
//! plus `Retry-After` when the request was rejected.

use axum::http::header::{
    CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY, RETRY_AFTER,
    STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use super::classifier::Category;
use super::limiter::RateLimitDecision;
use crate::config::Environment;

pub static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub const HSTS_VALUE: &str = "max-age=63072000; includeSubDomains; preload";
pub const PERMISSIONS_POLICY_VALUE: &str = "camera=(), microphone=(), geolocation=(), payment=()";
pub const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";
pub const PRIVATE_CACHE_VALUE: &str = "private, no-store";

// =============================================================================
// Content-Security-Policy
// =============================================================================

/// CSP directives the composer knows about, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CspDirective {
    DefaultSrc,
    ScriptSrc,
    StyleSrc,
    ImgSrc,
    FontSrc,
    ConnectSrc,
    FrameSrc,
    FormAction,
    BaseUri,
    ObjectSrc,
}

impl CspDirective {
    pub const ORDER: [CspDirective; 10] = [
        CspDirective::DefaultSrc,
        CspDirective::ScriptSrc,
        CspDirective::StyleSrc,
        CspDirective::ImgSrc,
        CspDirective::FontSrc,
        CspDirective::ConnectSrc,
        CspDirective::FrameSrc,
        CspDirective::FormAction,
        CspDirective::BaseUri,
        CspDirective::ObjectSrc,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            CspDirective::DefaultSrc => "default-src",
            CspDirective::ScriptSrc => "script-src",
            CspDirective::StyleSrc => "style-src",
            CspDirective::ImgSrc => "img-src",
            CspDirective::FontSrc => "font-src",
            CspDirective::ConnectSrc => "connect-src",
            CspDirective::FrameSrc => "frame-src",
            CspDirective::FormAction => "form-action",
            CspDirective::BaseUri => "base-uri",
            CspDirective::ObjectSrc => "object-src",
        }
    }

    /// Environment variable overriding this directive's sources.
    pub const fn env_key(self) -> &'static str {
        match self {
            CspDirective::DefaultSrc => "CSP_DEFAULT_SRC",
            CspDirective::ScriptSrc => "CSP_SCRIPT_SRC",
            CspDirective::StyleSrc => "CSP_STYLE_SRC",
            CspDirective::ImgSrc => "CSP_IMG_SRC",
            CspDirective::FontSrc => "CSP_FONT_SRC",
            CspDirective::ConnectSrc => "CSP_CONNECT_SRC",
            CspDirective::FrameSrc => "CSP_FRAME_SRC",
            CspDirective::FormAction => "CSP_FORM_ACTION",
            CspDirective::BaseUri => "CSP_BASE_URI",
            CspDirective::ObjectSrc => "CSP_OBJECT_SRC",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Source lists per directive. Rendering order is fixed by [`CspDirective::ORDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspPolicy {
    sources: [Vec<String>; 10],
}

impl CspPolicy {
    /// A policy with every directive empty (renders to an empty string).
    pub fn empty() -> Self {
        Self {
            sources: Default::default(),
        }
    }

    pub fn with_sources<I, S>(mut self, directive: CspDirective, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_sources(directive, sources);
        self
    }

    pub fn set_sources<I, S>(&mut self, directive: CspDirective, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources[directive.index()] = sources.into_iter().map(Into::into).collect();
    }

    pub fn sources(&self, directive: CspDirective) -> &[String] {
        &self.sources[directive.index()]
    }

    /// `directive src src; directive src; ...`. Empty directives are omitted.
    pub fn render(&self) -> String {
        CspDirective::ORDER
            .iter()
            .filter(|directive| !self.sources(**directive).is_empty())
            .map(|directive| format!("{} {}", directive.name(), self.sources(*directive).join(" ")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for CspPolicy {
    fn default() -> Self {
        Self::empty()
            .with_sources(CspDirective::DefaultSrc, ["'self'"])
            .with_sources(CspDirective::ScriptSrc, ["'self'", "'unsafe-inline'", "*.clerk.dev"])
            .with_sources(CspDirective::StyleSrc, ["'self'", "'unsafe-inline'"])
            .with_sources(CspDirective::ImgSrc, ["'self'", "data:", "*.clerk.dev"])
            .with_sources(CspDirective::FontSrc, ["'self'"])
            .with_sources(CspDirective::ConnectSrc, ["'self'", "*.clerk.dev"])
            .with_sources(CspDirective::FrameSrc, ["*.clerk.dev"])
            .with_sources(CspDirective::FormAction, ["'self'"])
            .with_sources(CspDirective::BaseUri, ["'self'"])
            .with_sources(CspDirective::ObjectSrc, ["'none'"])
    }
}

// =============================================================================
// Header Set
// =============================================================================

/// Ordered list of response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityHeaderSet {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaderSet {
    pub fn push(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    pub fn extend(&mut self, other: SecurityHeaderSet) {
        self.headers.extend(other.headers);
    }

    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Write every header onto `target`, replacing existing values.
    pub fn apply_to(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

/// Builds the security header set for a category.
#[derive(Debug, Clone)]
pub struct HeaderComposer {
    environment: Environment,
    csp: Option<HeaderValue>,
}

impl HeaderComposer {
    /// Pre-render the CSP value once.
    ///
    /// A policy containing characters that are not valid in a header value is
    /// dropped with a warning; config validation rejects such policies first.
    pub fn new(environment: Environment, csp: &CspPolicy) -> Self {
        let rendered = csp.render();
        let csp = if rendered.is_empty() {
            None
        } else {
            match HeaderValue::from_str(&rendered) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "Content-Security-Policy is not a valid header value, omitting");
                    None
                }
            }
        };

        Self { environment, csp }
    }

    pub fn compose(&self, category: Category) -> SecurityHeaderSet {
        let mut set = SecurityHeaderSet::default();

        set.push(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        set.push(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        set.push(REFERRER_POLICY, HeaderValue::from_static(REFERRER_POLICY_VALUE));
        set.push(
            PERMISSIONS_POLICY.clone(),
            HeaderValue::from_static(PERMISSIONS_POLICY_VALUE),
        );

        if let Some(csp) = &self.csp {
            set.push(CONTENT_SECURITY_POLICY, csp.clone());
        }

        if self.environment.is_production() {
            set.push(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_VALUE));
        }

        if category.requires_identity() {
            set.push(CACHE_CONTROL, HeaderValue::from_static(PRIVATE_CACHE_VALUE));
        }

        set
    }
}

/// Render a limiter decision as response headers.
pub fn rate_limit_headers(decision: &RateLimitDecision, now: u64) -> SecurityHeaderSet {
    let mut set = SecurityHeaderSet::default();

    if !decision.allowed {
        set.push(RETRY_AFTER, HeaderValue::from(decision.retry_after(now)));
    }
    set.push(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    let remaining = if decision.allowed { decision.remaining } else { 0 };
    set.push(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    set.push(X_RATELIMIT_RESET.clone(), HeaderValue::from(decision.reset_at));

    set
}
