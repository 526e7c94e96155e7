use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::gate::logger::GateDecision;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Gate rejections are not errors in this sense and live in [`Rejection`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        tracing::error!(error = %self, "Request failed");

        let (status, error_type, message) = match &self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required.",
            ),
            // Internal errors - never expose internal details to clients
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
            retry_after: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Why the gate short-circuited a request.
///
/// Each variant renders to the response the client sees. Security and
/// rate-limit headers are attached afterwards by the gate middleware, the
/// same as for forwarded responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Budget for the current window exhausted. Retryable after `retry_after` seconds.
    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    /// Protected route without an identity.
    #[error("authentication required, redirecting to {location}")]
    Unauthenticated { location: String },

    /// Admin route with an identity lacking every admin role.
    #[error("insufficient access, redirecting to {location}")]
    Unauthorized { location: String },
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Unauthenticated { .. } | Rejection::Unauthorized { .. } => {
                StatusCode::TEMPORARY_REDIRECT
            }
        }
    }

    pub fn decision(&self) -> GateDecision {
        match self {
            Rejection::RateLimitExceeded { .. } => GateDecision::RateLimited,
            Rejection::Unauthenticated { .. } => GateDecision::Unauthenticated,
            Rejection::Unauthorized { .. } => GateDecision::Unauthorized,
        }
    }

    fn redirect(status: StatusCode, location: &str) -> Response {
        // Targets come from config and form-encoded paths, so this only trips
        // on a misconfigured URL
        let location = HeaderValue::from_str(location).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Redirect target is not a valid header value, using '/'");
            HeaderValue::from_static("/")
        });
        (status, [(LOCATION, location)]).into_response()
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Rejection::RateLimitExceeded { retry_after } => {
                let body = ErrorResponse {
                    error: "rate_limit_exceeded".to_string(),
                    message: "Too many requests. Please retry later.".to_string(),
                    retry_after: Some(*retry_after),
                };
                (status, axum::Json(body)).into_response()
            }
            Rejection::Unauthenticated { location } | Rejection::Unauthorized { location } => {
                Self::redirect(status, location)
            }
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_rate_limit_rejection_body() {
        let response = Rejection::RateLimitExceeded { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limit_exceeded");
        assert_eq!(json["retry_after"], 42);
    }

    #[test]
    fn test_redirect_rejections() {
        let response = Rejection::Unauthenticated {
            location: "/sign-in?redirect_url=%2Fdashboard".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[LOCATION],
            "/sign-in?redirect_url=%2Fdashboard"
        );

        let response = Rejection::Unauthorized {
            location: "/?error=unauthorized".to_string(),
        }
        .into_response();
        assert_eq!(response.headers()[LOCATION], "/?error=unauthorized");
    }

    #[test]
    fn test_invalid_location_falls_back_to_root() {
        let response = Rejection::Unauthorized {
            location: "/bad\nvalue".to_string(),
        }
        .into_response();
        assert_eq!(response.headers()[LOCATION], "/");
    }

    #[test]
    fn test_rejection_decisions() {
        assert_eq!(
            Rejection::RateLimitExceeded { retry_after: 1 }.decision(),
            GateDecision::RateLimited
        );
        assert_eq!(
            Rejection::Unauthorized { location: "/".into() }.status(),
            StatusCode::TEMPORARY_REDIRECT
        );
    }

    #[test]
    fn test_response_status_follows_rejection() {
        for rejection in [
            Rejection::RateLimitExceeded { retry_after: 3 },
            Rejection::Unauthenticated { location: "/sign-in".into() },
            Rejection::Unauthorized { location: "/".into() },
        ] {
            let expected = rejection.status();
            assert_eq!(rejection.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_app_error_hides_internal_details() {
        let response = AppError::Internal("db password wrong".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("password"));
    }
}
