use core::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderName, Request, StatusCode, header::AUTHORIZATION},
    middleware as ax_middleware,
    routing::{self, get},
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::{
    app::AppState,
    http::{
        api,
        auth::{self, CONTROL_KEY_HEADER},
        server::middleware::LevelAdjustingOnFailure,
    },
};

/// Creates the router by merging public and key-protected routes.
///
/// Only `/healthz` is public. Everything else requires the control key.
pub(crate) fn create_app_router(app_state: &AppState) -> Router<AppState> {
    let public = Router::new().route("/healthz", get(api::healthz));

    let private = api::routes().route_layer(ax_middleware::from_fn_with_state(
        app_state.clone(),
        auth::require,
    ));

    public.merge(private)
}

/// Builds the complete service with its middleware stack.
///
/// `request_timeout` bounds every request and must exceed the gateway health timeout.
pub fn create_app(app_state: AppState, request_timeout: Duration) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION, HeaderName::from_static(CONTROL_KEY_HEADER)])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http().on_failure(LevelAdjustingOnFailure))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    create_app_router(&app_state)
        .with_state(app_state)
        .fallback(routing::any(|req: Request<Body>| async move {
            tracing::warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "message": "no such route" })),
            )
        }))
        .layer(middleware_stack)
}
