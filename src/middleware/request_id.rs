//! Per-request trace tokens.
//!
//! Every gated request gets a fresh `req_<epoch millis>_<random>` id. The
//! random part is a UUIDv4 in simple form, so collisions are not handled
//! beyond that. The id is returned in `X-Request-Id`, written to the request
//! record, and inserted into request extensions as [`RequestId`] for
//! downstream handlers.

use axum::http::request::Parts;
use uuid::Uuid;

/// Request id attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Generate a new request id for a request seen at `now_millis`.
pub fn generate_request_id(now_millis: u64) -> String {
    format!("req_{now_millis}_{}", Uuid::new_v4().simple())
}

/// Extension trait to read the request id inside handlers.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl RequestIdExt for Parts {
    fn request_id(&self) -> Option<&str> {
        self.extensions.get::<RequestId>().map(RequestId::as_str)
    }
}

impl<B> RequestIdExt for axum::http::Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions().get::<RequestId>().map(RequestId::as_str)
    }
}
