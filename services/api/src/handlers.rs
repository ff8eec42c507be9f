//! Axum Handlers for the REST API
//!
//! The REST surface is deliberately small: live traffic flows over the
//! WebSocket, and these endpoints exist for reconnect reconciliation and
//! record lookups. `utoipa` doc comments generate the OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    models::{ContextSnapshot, ErrorResponse, ExecutionRecordDto},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn require_user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Get the conversation context snapshot for the calling user.
///
/// Reconnecting clients call this instead of relying on event redelivery:
/// fan-out is best-effort, the snapshot is the source of truth.
#[utoipa::path(
    get,
    path = "/context",
    responses(
        (status = 200, description = "Current bounded conversation view", body = ContextSnapshot),
        (status = 400, description = "Bad request", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the calling user")
    )
)]
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ContextSnapshot>, ApiError> {
    let user_id = require_user_id(&headers)?;
    let context = state.context.context(user_id).await;
    Ok(Json(ContextSnapshot::from(&context)))
}

/// Get the execution record of an action by its id.
#[utoipa::path(
    get,
    path = "/actions/{id}",
    responses(
        (status = 200, description = "Execution record", body = ExecutionRecordDto),
        (status = 404, description = "Unknown action id", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Action ID")
    )
)]
pub async fn get_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionRecordDto>, ApiError> {
    let record = state
        .executor
        .record(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Action with id '{}' not found", id)))?;
    Ok(Json(ExecutionRecordDto::from(&record)))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is up")
    )
)]
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
