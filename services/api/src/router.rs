//! Axum Router Configuration
//!
//! The complete HTTP routing for the application: REST API, the
//! conversation WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        BlockCheckRequest, BlockCheckResponse, CharacterSummary, ErrorResponse, FeedbackResponse,
        GateStatsResponse, SessionInfo,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_characters,
        handlers::check_block,
        handlers::get_feedback,
        handlers::get_stats,
    ),
    components(
        schemas(CharacterSummary, BlockCheckRequest, BlockCheckResponse, FeedbackResponse, SessionInfo, GateStatsResponse, ErrorResponse)
    ),
    tags(
        (name = "Parley API", description = "Turn-limited spoken conversation practice")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/characters", get(handlers::list_characters))
        .route("/api/check-block", post(handlers::check_block))
        .route("/api/sessions/{id}/feedback", get(handlers::get_feedback))
        .route("/api/stats", get(handlers::get_stats))
        .route("/ws/chat/{character_id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
