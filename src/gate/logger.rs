//! Structured per-request records.
//!
//! Every gated request produces exactly one [`RequestRecord`], whatever the
//! outcome. Records go to an injected [`LogSink`]; the pipeline calls
//! [`log_request`], which swallows sink failures so a broken sink can never
//! turn into a client-visible error.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::classifier::Category;
use crate::config::Environment;

/// Final decision recorded for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Allowed,
    RateLimited,
    Unauthenticated,
    Unauthorized,
}

impl GateDecision {
    pub const fn as_str(self) -> &'static str {
        match self {
            GateDecision::Allowed => "allowed",
            GateDecision::RateLimited => "rate_limited",
            GateDecision::Unauthenticated => "unauthenticated",
            GateDecision::Unauthorized => "unauthorized",
        }
    }
}

/// One structured record per request. The field set never varies with the
/// output encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub category: Category,
    /// Rate limit key (`ip:...` or `user:...`).
    pub identifier: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub principal_id: Option<String>,
    pub session_id: Option<String>,
    pub org_id: Option<String>,
    pub roles: Vec<String>,
    pub decision: GateDecision,
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode request record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("log sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for request records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &RequestRecord) -> Result<(), SinkError>;
}

/// Emit a record, dropping it on sink failure.
pub fn log_request(sink: &dyn LogSink, record: &RequestRecord) {
    if let Err(e) = sink.emit(record) {
        debug!(error = %e, request_id = %record.request_id, "Request record dropped");
    }
}

/// JSON encoding used by [`TracingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEncoding {
    Pretty,
    Compact,
}

impl RecordEncoding {
    /// Pretty output for local development, single-line JSON in production.
    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            RecordEncoding::Compact
        } else {
            RecordEncoding::Pretty
        }
    }
}

/// Writes records as JSON through `tracing` under the
/// `taskboard_gate::access` target.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    encoding: RecordEncoding,
}

impl TracingSink {
    pub fn new(encoding: RecordEncoding) -> Self {
        Self { encoding }
    }

    pub fn render(&self, record: &RequestRecord) -> Result<String, SinkError> {
        let rendered = match self.encoding {
            RecordEncoding::Pretty => serde_json::to_string_pretty(record)?,
            RecordEncoding::Compact => serde_json::to_string(record)?,
        };
        Ok(rendered)
    }
}

impl LogSink for TracingSink {
    fn emit(&self, record: &RequestRecord) -> Result<(), SinkError> {
        let rendered = self.render(record)?;

        if record.decision == GateDecision::Allowed {
            info!(
                target: "taskboard_gate::access",
                request_id = %record.request_id,
                decision = record.decision.as_str(),
                status = record.status,
                "{rendered}"
            );
        } else {
            warn!(
                target: "taskboard_gate::access",
                request_id = %record.request_id,
                decision = record.decision.as_str(),
                status = record.status,
                "{rendered}"
            );
        }
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct CapturingSink {
    records: Arc<Mutex<Vec<RequestRecord>>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record captured so far.
    pub fn records(&self) -> Vec<RequestRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<RequestRecord> {
        self.records().pop()
    }
}

impl LogSink for CapturingSink {
    fn emit(&self, record: &RequestRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record() -> RequestRecord {
        RequestRecord {
            request_id: "req_1_abc".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            method: "GET".to_string(),
            path: "/dashboard".to_string(),
            category: Category::ProtectedGeneral,
            identifier: "user:alice".to_string(),
            client_ip: "203.0.113.7".to_string(),
            user_agent: Some("curl/8.0".to_string()),
            principal_id: Some("alice".to_string()),
            session_id: Some("sess_1".to_string()),
            org_id: None,
            roles: vec!["member".to_string()],
            decision: GateDecision::Allowed,
            status: 200,
        }
    }

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn emit(&self, _record: &RequestRecord) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("disk full".to_string()))
        }
    }

    #[test]
    fn test_pretty_and_compact_share_fields() {
        let record = record();
        let pretty = TracingSink::new(RecordEncoding::Pretty).render(&record).unwrap();
        let compact = TracingSink::new(RecordEncoding::Compact).render(&record).unwrap();

        assert!(pretty.contains('\n'));
        assert!(!compact.contains('\n'));

        let pretty: serde_json::Value = serde_json::from_str(&pretty).unwrap();
        let compact: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert_eq!(pretty, compact);
    }

    #[test]
    fn test_record_serialization_shape() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["category"], "protected_general");
        assert_eq!(value["decision"], "allowed");
        assert_eq!(value["principal_id"], "alice");
        assert!(value["org_id"].is_null());
        assert_eq!(value["status"], 200);
    }

    #[test]
    fn test_encoding_follows_environment() {
        assert_eq!(
            RecordEncoding::for_environment(Environment::Production),
            RecordEncoding::Compact
        );
        assert_eq!(
            RecordEncoding::for_environment(Environment::Development),
            RecordEncoding::Pretty
        );
    }

    #[test]
    fn test_capturing_sink_collects() {
        let sink = CapturingSink::new();
        log_request(&sink, &record());
        log_request(&sink, &record());

        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.last().unwrap().path, "/dashboard");
    }

    #[test]
    fn test_broken_sink_is_swallowed() {
        // Must not panic or propagate
        log_request(&BrokenSink, &record());
    }

    #[test]
    fn test_tracing_sink_emits_without_subscriber() {
        let sink = TracingSink::new(RecordEncoding::Compact);
        assert!(sink.emit(&record()).is_ok());
    }
}
