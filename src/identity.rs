//! Identity resolution against the external identity provider.
//!
//! The gate never issues sessions. It only asks an [`IdentityProvider`] to turn
//! the request credentials into an [`Identity`], and to answer role checks for
//! admin routes. Resolution is the only suspending step in the pipeline and is
//! always bounded by [`resolve_with_timeout`].
//!
//! # Static Token Provider
//!
//! [`StaticTokenProvider`] is a small table-backed provider used by the binary
//! and the tests. It accepts a bearer token from the `Authorization` header or
//! a `__session` cookie and maps it to a configured identity:
//!
//! ```text
//! IDENTITY_TOKENS="tok-alice=alice|admin|org_1|sess_1;tok-bob=bob|member"
//! #                token   = principal|roles(+ separated)|org|session
//! ```
//!
//! Tokens are compared in constant time against every entry.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::{AppError, AppResult};

/// Cookie carrying a session token when no `Authorization` header is sent.
pub const SESSION_COOKIE: &str = "__session";

/// A resolved principal, owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub principal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn new(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            session_id: None,
            org_id: None,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Whether the identity holds at least one of `roles`.
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|role| self.roles.contains(role))
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("identity provider failed: {0}")]
    Provider(String),
}

impl IdentityError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            IdentityError::Timeout(_) => "timeout",
            IdentityError::Provider(_) => "provider_error",
        }
    }
}

/// Boxed future returned by [`IdentityProvider::resolve_identity`].
pub type IdentityFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Identity>, IdentityError>> + Send + 'a>>;

/// The external identity-provider collaborator.
pub trait IdentityProvider: Send + Sync {
    /// Resolve the caller's identity from request credentials.
    ///
    /// `Ok(None)` means the request is anonymous.
    fn resolve_identity<'a>(&'a self, parts: &'a Parts) -> IdentityFuture<'a>;

    /// Whether `identity` satisfies any of `roles`.
    fn require_role(&self, identity: &Identity, roles: &[String]) -> bool {
        identity.has_any_role(roles)
    }
}

/// Resolve an identity, turning a slow provider into [`IdentityError::Timeout`].
pub async fn resolve_with_timeout(
    provider: &dyn IdentityProvider,
    parts: &Parts,
    timeout: Duration,
) -> Result<Option<Identity>, IdentityError> {
    match tokio::time::timeout(timeout, provider.resolve_identity(parts)).await {
        Ok(result) => result,
        Err(_) => Err(IdentityError::Timeout(timeout)),
    }
}

/// Extract the session credential from a request.
///
/// Checks in order:
/// 1. `Authorization: Bearer <token>` (scheme is case-insensitive)
/// 2. `__session` cookie
pub fn extract_credential(parts: &Parts) -> Option<&str> {
    if let Some(value) = parts.headers.get(AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some((scheme, token)) = value.trim().split_once(' ')
        && scheme.eq_ignore_ascii_case("bearer")
        && !token.trim().is_empty()
    {
        return Some(token.trim());
    }

    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

/// Table-backed identity provider.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    grants: Vec<(String, Identity)>,
}

impl StaticTokenProvider {
    pub fn new(grants: Vec<(String, Identity)>) -> Self {
        Self { grants }
    }

    /// Parse the `IDENTITY_TOKENS` format described in the module docs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an entry without a token or
    /// principal.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mut grants = Vec::new();

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, descriptor) = entry.split_once('=').ok_or_else(|| {
                AppError::ConfigError("IDENTITY_TOKENS entry is missing '='".to_string())
            })?;

            let token = token.trim();
            let mut fields = descriptor.split('|').map(str::trim);
            let principal = fields.next().unwrap_or_default();
            if token.is_empty() || principal.is_empty() {
                return Err(AppError::ConfigError(
                    "IDENTITY_TOKENS entries need a token and a principal".to_string(),
                ));
            }

            let mut identity = Identity::new(principal);
            if let Some(roles) = fields.next() {
                for role in roles.split('+').map(str::trim).filter(|r| !r.is_empty()) {
                    identity = identity.with_role(role);
                }
            }
            if let Some(org) = fields.next().filter(|o| !o.is_empty()) {
                identity = identity.with_org(org);
            }
            if let Some(session) = fields.next().filter(|s| !s.is_empty()) {
                identity = identity.with_session(session);
            }

            grants.push((token.to_string(), identity));
        }

        Ok(Self { grants })
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Look a token up, touching every entry so timing does not leak which
    /// one matched.
    fn lookup(&self, token: &str) -> Option<&Identity> {
        let mut found = None;
        for (candidate, identity) in &self.grants {
            let matches: bool = candidate.as_bytes().ct_eq(token.as_bytes()).into();
            if matches && found.is_none() {
                found = Some(identity);
            }
        }
        found
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn resolve_identity<'a>(&'a self, parts: &'a Parts) -> IdentityFuture<'a> {
        Box::pin(async move {
            Ok(extract_credential(parts).and_then(|token| self.lookup(token).cloned()))
        })
    }
}
