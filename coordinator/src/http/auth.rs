//! Pre-shared control key middleware.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse as _, Response},
};
use tenantgate_common::verify_control_key;
use tracing::info;

use crate::app::AppState;
use crate::http::api::ApiError;

pub const CONTROL_KEY_HEADER: &str = "x-control-key";

/// The key from `X-Control-Key`, or else from `Authorization: Bearer`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CONTROL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// Rejects requests without the control key (401) or with a wrong one (403).
pub async fn require(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let verdict = presented_key(req.headers()).map(|key| verify_control_key(key, &state.control_key));
    match verdict {
        Some(true) => next.run(req).await,
        Some(false) => {
            info!(uri = %req.uri(), "require: invalid control key");
            ApiError::new(StatusCode::FORBIDDEN, "forbidden", "invalid control key").into_response()
        }
        None => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "missing control key",
        )
        .into_response(),
    }
}
