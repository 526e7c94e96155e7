//! HTTP middleware wiring the request gate into the tower stack.
//!
//! - **Gate**: classification, rate limiting, access control, security headers
//!   and request records in a single layer
//! - **Client IP**: peer address, or `X-Forwarded-For` / `X-Real-IP` from trusted proxies
//! - **Request ID**: `req_<epoch millis>_<random>` generation and extension access
//!
//! # Architecture
//!
//! ```text
//! Request → Trace → CORS → Gate ──────────────→ Handler → Response
//!                           ↓            ↓
//!                      429 / 307    Identity + RequestId extensions
//! ```

pub mod gate;
pub mod ip;
pub mod request_id;

pub use gate::{GateLayer, GateService};
pub use ip::{CidrRange, TrustedProxies, UNKNOWN_IP, extract_client_ip};
pub use request_id::{RequestId, RequestIdExt, generate_request_id};
