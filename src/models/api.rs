use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::Identity;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// `development` or `production`
    pub environment: String,
    /// Service version
    pub version: String,
    pub uptime_seconds: u64,
    /// Identifiers currently tracked by the rate limiter
    pub rate_limit_entries: usize,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// The caller's resolved identity, as seen by the gate.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub principal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub roles: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl MeResponse {
    pub fn new(identity: Identity, request_id: Option<String>) -> Self {
        Self {
            principal_id: identity.principal_id,
            session_id: identity.session_id,
            org_id: identity.org_id,
            roles: identity.roles,
            request_id,
        }
    }
}

/// Acknowledgement returned by the placeholder application handler.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: &'static str,
    pub path: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_me_response_skips_missing_fields() {
        let identity = Identity::new("alice").with_role("member");
        let response = MeResponse::new(identity, None);

        let json = serde_json::to_value(&response).expect("Serialization should succeed");
        assert_eq!(json["principal_id"], "alice");
        assert_eq!(json["roles"], serde_json::json!(["member"]));
        assert!(json.get("org_id").is_none());
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            environment: "development".to_string(),
            version: "0.1.0".to_string(),
            uptime_seconds: 3,
            rate_limit_entries: 0,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"rate_limit_entries\":0"));
    }
}
