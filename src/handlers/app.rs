//! Application endpoints behind the gate.
//!
//! The board application itself lives elsewhere; these handlers stand in for
//! it so the gate can be exercised end to end.

use axum::Json;
use axum::extract::Extension;
use axum::http::Uri;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::middleware::RequestId;
use crate::models::{AckResponse, MeResponse};

/// `GET /api/me`: the identity the gate resolved for this request.
///
/// Protected by the default route table. Answers 401 if the route table was
/// reconfigured so that no identity reaches the handler.
#[instrument(skip_all)]
pub async fn me(
    identity: Option<Extension<Identity>>,
    request_id: Option<Extension<RequestId>>,
) -> AppResult<Json<MeResponse>> {
    let Some(Extension(identity)) = identity else {
        return Err(AppError::Unauthenticated);
    };
    let request_id = request_id.map(|Extension(id)| id.0);

    Ok(Json(MeResponse::new(identity, request_id)))
}

/// Fallback acknowledging any path the gate let through.
pub async fn acknowledge(uri: Uri) -> Json<AckResponse> {
    Json(AckResponse {
        status: "ok",
        path: uri.path().to_string(),
    })
}
