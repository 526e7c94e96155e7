mod app;
mod health;

pub use app::{acknowledge, me};
pub use health::{health_check, readiness_check};
