mod api;

pub use api::{AckResponse, HealthResponse, MeResponse};
