//! REST API Models
//!
//! DTOs for the HTTP surface, with `utoipa` schemas for the generated
//! OpenAPI documentation. Wire types for the WebSocket live in
//! `ws::protocol`.

use chrono::{DateTime, Utc};
use parley_core::feedback::FeedbackBundle;
use parley_core::gate::GateStats;
use parley_core::persona::Persona;
use parley_core::session::Utterance;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A persona as shown in the catalog. The system prompt is deliberately
/// omitted from the public listing.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct CharacterSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub creator: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub interactions: String,
    pub likes: String,
    pub init_message: String,
}

impl From<&Persona> for CharacterSummary {
    fn from(persona: &Persona) -> Self {
        Self {
            id: persona.id.to_string(),
            name: persona.name.to_string(),
            description: persona.description.to_string(),
            tags: persona.tags.iter().map(|t| t.to_string()).collect(),
            creator: persona.creator.to_string(),
            image_url: persona.image_url.to_string(),
            interactions: persona.interactions.to_string(),
            likes: persona.likes.to_string(),
            init_message: persona.init_message.to_string(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct BlockCheckRequest {
    pub fingerprint: String,
}

#[derive(Serialize, ToSchema)]
pub struct BlockCheckResponse {
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionInfo {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub character_id: String,
    pub turn_count: u32,
    pub duration_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Post-session report: what the learner sees on the feedback page.
#[derive(Serialize, ToSchema)]
pub struct FeedbackResponse {
    pub session_info: SessionInfo,
    #[schema(value_type = Object)]
    pub feedback: FeedbackBundle,
    #[schema(value_type = Vec<Object>)]
    pub conversation_history: Vec<Utterance>,
}

/// Advisory remote-call counters, per capability.
#[derive(Serialize, ToSchema)]
pub struct GateStatsResponse {
    #[schema(value_type = Object)]
    pub transcription: GateStats,
    #[schema(value_type = Object)]
    pub synthesis: GateStats,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_summary_omits_system_prompt() {
        let persona = parley_core::persona::find("jeongsu").unwrap();
        let summary = CharacterSummary::from(persona);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"imageUrl\""));
        assert!(json.contains("Jeongsu"));
        assert!(!json.contains("substitute math teacher")); // prompt text
    }

    #[test]
    fn block_check_request_requires_fingerprint() {
        let ok: BlockCheckRequest = serde_json::from_str(r#"{"fingerprint": "fp"}"#).unwrap();
        assert_eq!(ok.fingerprint, "fp");
        assert!(serde_json::from_str::<BlockCheckRequest>("{}").is_err());
    }

    #[test]
    fn block_check_response_drops_empty_message() {
        let allowed = BlockCheckResponse {
            is_blocked: false,
            message: None,
        };
        let json = serde_json::to_string(&allowed).unwrap();
        assert_eq!(json, r#"{"is_blocked":false}"#);
    }

    #[test]
    fn error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Session not found"}"#);
    }
}
