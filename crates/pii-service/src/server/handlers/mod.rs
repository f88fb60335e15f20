//! Axum request handlers for all service endpoints.

pub mod payments;
pub mod users;
mod views;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// `GET /`: service banner.
pub async fn root() -> &'static str {
    "PII Encryption Service running"
}

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when the database answers, `503 Service Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let repo = state.repo.clone();
    let database_ok = run_blocking(move || Ok(repo.ping()?)).await.is_ok();

    let (status_code, status_str) = if database_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        encryption_enabled: state.codec().is_enabled(),
        active_key_id: state.codec().active_key_id().to_owned(),
        database_ok,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

/// Run a blocking database call on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Trimmed, non-empty value of an optional request field.
fn provided(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "entity update rejected");
    ApiError(common::ServiceError::Internal("failed to apply update".into()))
}
