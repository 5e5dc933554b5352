use axum::http::StatusCode;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::trace::{DefaultOnFailure, OnFailure};

/// Custom failure handling for the trace layer. 504 responses are the
/// expected outcome of a gateway that never got healthy and are logged at
/// `WARN` instead of `ERROR`.
#[derive(Clone, Copy)]
pub(crate) struct LevelAdjustingOnFailure;

impl OnFailure<ServerErrorsFailureClass> for LevelAdjustingOnFailure {
    fn on_failure(
        &mut self,
        failure_classification: ServerErrorsFailureClass,
        latency: core::time::Duration,
        span: &tracing::Span,
    ) {
        use ServerErrorsFailureClass as S;

        match failure_classification {
            S::StatusCode(StatusCode::GATEWAY_TIMEOUT) => {
                tracing::warn!(classification = %S::StatusCode(StatusCode::GATEWAY_TIMEOUT), latency = %format!("{} ms", latency.as_millis()), "response failed (downgraded)");
            }
            value => {
                DefaultOnFailure::default().on_failure(value, latency, span);
            }
        }
    }
}
