//! JSON endpoints for gateway lifecycle operations.

use alloc::sync::Arc;
use core::error::Error as _;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{Instrument as _, error};

use crate::app::{
    AppState, DestroyOutcome, GatewayEntry, GatewayError, Orchestrator, ReloadOutcome,
    SpawnOutcome, SpawnStatus,
};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_gateways))
        .route("/spawn", post(spawn_gateway))
        .route("/{tenant_id}", delete(destroy_gateway))
        .route("/{tenant_id}/restart", post(restart_gateway))
}

/// Error response body: `{"error": <code>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

const fn status_for(error: &GatewayError) -> StatusCode {
    match *error {
        GatewayError::InvalidTenantId(_) | GatewayError::ProjectNotActive { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::ProjectNotFound(_) | GatewayError::NotRunning(_) => StatusCode::NOT_FOUND,
        GatewayError::SpawnConflict(_) => StatusCode::CONFLICT,
        GatewayError::HealthTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Runtime(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Directory(_)
        | GatewayError::SecretNotFound(..)
        | GatewayError::Decryption(_)
        | GatewayError::ConfigStore(_)
        | GatewayError::PoolAdd(_)
        | GatewayError::Unhealthy(_)
        | GatewayError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(status_for(&error), error.code(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

/// Runs a lifecycle operation on its own task.
///
/// A dropped request (client gone, request timeout) only stops the waiting,
/// never the operation itself.
async fn run_detached<T, F, Fut>(state: &AppState, operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
{
    let task = tokio::spawn(operation(Arc::clone(&state.orchestrator)).in_current_span());
    match task.await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!(error = %e, "Lifecycle task did not complete");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "operation task did not complete",
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpawnRequest {
    tenant_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct GatewayList {
    containers: Vec<GatewayEntry>,
}

/// Provisions or reconciles a tenant's gateway.
///
/// Answers 201 when a new container was started and 200 when one was already
/// running, whether or not it had to reload.
#[axum::debug_handler]
async fn spawn_gateway(
    State(state): State<AppState>,
    body: Result<Json<SpawnRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SpawnOutcome>), ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    })?;
    let outcome = run_detached(&state, |orchestrator| async move {
        orchestrator.spawn(&request.tenant_id).await
    })
    .await?;
    let status = match outcome.status {
        SpawnStatus::Running => StatusCode::CREATED,
        SpawnStatus::AlreadyRunning | SpawnStatus::Reloaded => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[axum::debug_handler]
async fn destroy_gateway(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DestroyOutcome>, ApiError> {
    let outcome = run_detached(&state, |orchestrator| async move {
        orchestrator.destroy(&tenant_id).await
    })
    .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
async fn restart_gateway(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<ReloadOutcome>, ApiError> {
    let outcome = run_detached(&state, |orchestrator| async move {
        orchestrator.reload(&tenant_id).await
    })
    .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
async fn list_gateways(State(state): State<AppState>) -> Result<Json<GatewayList>, ApiError> {
    let containers = state.orchestrator.list().await?;
    Ok(Json(GatewayList { containers }))
}

/// Unauthenticated liveness of the manager itself.
pub(crate) async fn healthz() -> &'static str {
    "ok"
}
