//! Defines the WebSocket message protocol between the browser client and the API server.

use parley_core::emotion::Emotion;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shown when a fingerprint with a prior completed session connects.
pub const BLOCKED_MESSAGE: &str =
    "You have already used the service.\n\nThe free trial is available only once.";

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Supplies the client fingerprint and/or the chosen difficulty.
    /// Either field may arrive alone; the first fingerprint wins.
    Init {
        #[serde(default)]
        fingerprint: Option<String>,
        #[serde(default)]
        difficulty: Option<String>,
    },
    /// One recorded user utterance, base64-encoded audio.
    Audio { audio: String },
    /// Liveness probe; answered with `pong`.
    Ping,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the connection and announces the session parameters.
    Connected {
        character_id: String,
        character_name: String,
        session_id: Uuid,
        max_turns: u32,
        init_message: String,
        /// Asks the client to show the difficulty picker.
        request_difficulty: bool,
    },
    /// The fingerprint is permanently blocked; the connection closes next.
    Blocked { message: String },
    /// Progress notice while a turn is being processed.
    StatusUpdate { message: String },
    /// The transcription of the user's last utterance.
    Transcript { text: String },
    TurnCountUpdate { turn_count: u32, max_turns: u32 },
    /// The agent's reply text.
    ReplyText { text: String },
    /// The persona image matching the reply's displayed emotion.
    CharacterImage { image_url: String, emotion: Emotion },
    AudioStreamStart,
    /// A chunk of synthesized reply audio, base64-encoded.
    AudioChunk { data: String },
    AudioStreamEnd,
    /// Up to three things the learner could say next.
    SuggestedResponses { suggestions: Vec<String> },
    /// The turn limit was reached; emitted before the final audio stream.
    SessionCompleted {
        session_id: Uuid,
        turn_count: u32,
        message: String,
    },
    /// Recoverable or fatal error notice.
    Error { message: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_message_parses_with_partial_fields() {
        let full: ClientMessage =
            serde_json::from_str(r#"{"type": "init", "fingerprint": "fp", "difficulty": "beginner"}"#)
                .unwrap();
        match full {
            ClientMessage::Init {
                fingerprint,
                difficulty,
            } => {
                assert_eq!(fingerprint.as_deref(), Some("fp"));
                assert_eq!(difficulty.as_deref(), Some("beginner"));
            }
            other => panic!("expected init, got {other:?}"),
        }

        let bare: ClientMessage = serde_json::from_str(r#"{"type": "init"}"#).unwrap();
        assert!(matches!(
            bare,
            ClientMessage::Init {
                fingerprint: None,
                difficulty: None
            }
        ));
    }

    #[test]
    fn audio_message_requires_payload() {
        let ok: ClientMessage =
            serde_json::from_str(r#"{"type": "audio", "audio": "AAAA"}"#).unwrap();
        assert!(matches!(ok, ClientMessage::Audio { .. }));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "audio"}"#).is_err());
    }

    #[test]
    fn unknown_client_message_kind_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "dance"}"#).is_err());
    }

    #[test]
    fn server_messages_are_type_tagged_snake_case() {
        let msg = ServerMessage::TurnCountUpdate {
            turn_count: 3,
            max_turns: 10,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"turn_count_update","turn_count":3,"max_turns":10}"#
        );

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }

    #[test]
    fn character_image_serializes_emotion_lowercase() {
        let msg = ServerMessage::CharacterImage {
            image_url: "/characters/man_smile.png".into(),
            emotion: Emotion::Smile,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""emotion":"smile""#));
    }

    #[test]
    fn session_completed_carries_turn_accounting() {
        let id = Uuid::new_v4();
        let msg = ServerMessage::SessionCompleted {
            session_id: id,
            turn_count: 10,
            message: "The conversation is complete!".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"session_completed""#));
        assert!(json.contains(&id.to_string()));
    }
}
