//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{ContextSnapshot, ErrorResponse, ExecutionRecordDto, TurnDto},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_context,
        handlers::get_action,
        handlers::healthz,
    ),
    components(
        schemas(ContextSnapshot, TurnDto, ExecutionRecordDto, ErrorResponse)
    ),
    tags(
        (name = "Mentor API", description = "Conversation snapshots and action records for the Mentor assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/context", get(handlers::get_context))
        .route("/actions/{id}", get(handlers::get_action))
        .route("/healthz", get(handlers::healthz))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
