//! Tower middleware running the request gate in front of the application.
//!
//! # Response Headers
//!
//! Every gated response, forwarded or rejected, carries:
//! - The security header set for the request's category
//! - `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//! - `Retry-After` (429 only)
//! - `X-Request-Id`
//!
//! Static assets on public routes (when passthrough is enabled) bypass the
//! gate entirely and get none of these. A protected path is gated whatever
//! its extension.
//!
//! # Request Extensions
//!
//! Forwarded requests carry the resolved [`Identity`](crate::identity::Identity)
//! (when one was resolved) and the [`RequestId`].

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::request_id::RequestId;
use crate::error::Rejection;
use crate::gate::Gate;

/// Layer applying a shared [`Gate`] to every request.
///
/// # Example
///
/// ```rust,ignore
/// let gate = Arc::new(Gate::from_config(&config, provider, sink, clock)?);
/// let app = Router::new()
///     .route("/dashboard", get(handler))
///     .layer(GateLayer::new(gate));
/// ```
#[derive(Clone)]
pub struct GateLayer {
    gate: Arc<Gate>,
}

impl GateLayer {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Gate service wrapper.
#[derive(Clone)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<Gate>,
}

impl<S> Service<Request<Body>> for GateService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let mut inner = self.inner.clone();

        if gate.is_passthrough(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let evaluation = gate.evaluate(&parts).await;

            let mut response = match &evaluation.rejection {
                None => {
                    if let Some(identity) = &evaluation.identity {
                        parts.extensions.insert(identity.clone());
                    }
                    parts
                        .extensions
                        .insert(RequestId(evaluation.request_id.clone()));
                    inner.call(Request::from_parts(parts, body)).await?
                }
                Some(rejection) => {
                    if let Rejection::RateLimitExceeded { retry_after } = rejection {
                        warn!(
                            identifier = %evaluation.identifier,
                            path = %evaluation.path,
                            retry_after_secs = retry_after,
                            "Rate limit exceeded"
                        );
                    }
                    rejection.clone().into_response()
                }
            };

            evaluation.headers.apply_to(response.headers_mut());
            gate.record(&evaluation, response.status());

            Ok(response)
        })
    }
}
