//! Axum Handlers for the REST API
//!
//! Catalog listing, the pre-connect block check, the post-session feedback
//! report and the gate counter snapshot. `utoipa` doc comments generate
//! the OpenAPI documentation.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use parley_core::persona;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    models::{
        BlockCheckRequest, BlockCheckResponse, CharacterSummary, ErrorResponse, FeedbackResponse,
        GateStatsResponse, SessionInfo,
    },
    state::AppState,
    ws::protocol::BLOCKED_MESSAGE,
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

/// List the persona catalog.
#[utoipa::path(
    get,
    path = "/api/characters",
    responses(
        (status = 200, description = "Available conversation personas", body = [CharacterSummary])
    )
)]
pub async fn list_characters() -> Json<Vec<CharacterSummary>> {
    Json(persona::all().iter().map(CharacterSummary::from).collect())
}

/// Check whether a fingerprint is permanently blocked.
///
/// Called from the home page before a character is opened, mirroring the
/// coarse check the WebSocket handshake performs.
#[utoipa::path(
    post,
    path = "/api/check-block",
    request_body = BlockCheckRequest,
    responses(
        (status = 200, description = "Block decision for the fingerprint", body = BlockCheckResponse)
    )
)]
pub async fn check_block(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<BlockCheckRequest>,
) -> Json<BlockCheckResponse> {
    let allowed = state
        .guard
        .may_proceed(Some(addr.ip()), Some(&payload.fingerprint))
        .await;
    Json(BlockCheckResponse {
        is_blocked: !allowed,
        message: (!allowed).then(|| BLOCKED_MESSAGE.to_string()),
    })
}

/// Fetch the feedback report for a completed session.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/feedback",
    responses(
        (status = 200, description = "Feedback report", body = FeedbackResponse),
        (status = 400, description = "Session not completed yet", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let report = state
        .store
        .fetch_report(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;

    if !report.is_completed {
        return Err(ApiError::BadRequest(
            "The conversation has not been completed yet.".to_string(),
        ));
    }

    let duration_seconds = report
        .ended_at
        .map(|end| (end - report.started_at).num_seconds())
        .unwrap_or(0);

    Ok(Json(FeedbackResponse {
        session_info: SessionInfo {
            session_id: report.session_id,
            character_id: report.character_id.clone(),
            turn_count: report.turn_count,
            duration_seconds,
            started_at: report.started_at,
            ended_at: report.ended_at,
        },
        feedback: report.feedback,
        conversation_history: report.history,
    }))
}

/// Remote-call gate counters, per capability.
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Advisory admission-gate counters", body = GateStatsResponse)
    )
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<GateStatsResponse> {
    Json(GateStatsResponse {
        transcription: state.transcription_gate.stats(),
        synthesis: state.synthesis_gate.stats(),
    })
}
