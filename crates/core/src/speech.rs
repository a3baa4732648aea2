//! Speech-to-text and text-to-speech capability seam.
//!
//! Synthesis is consumed as a lazy chunk stream so playback can start
//! before the full utterance is rendered; a call is restartable but not
//! resumable mid-stream.

use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Lazy audio chunk stream produced by synthesis.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Transcribes a complete audio payload to text.
    async fn transcribe(&self, audio: Bytes) -> Result<String, RemoteError>;

    /// Starts synthesis of `text` in the given voice, yielding audio
    /// chunks as the backend produces them.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioStream, RemoteError>;
}

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Low-latency model for live conversation turns.
const TTS_MODEL: &str = "eleven_flash_v2_5";
const STT_MODEL: &str = "scribe_v1";

/// ElevenLabs REST client implementing both speech capabilities.
pub struct ElevenLabsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ElevenLabsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SpeechClient for ElevenLabsClient {
    async fn transcribe(&self, audio: Bytes) -> Result<String, RemoteError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model_id", STT_MODEL)
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/speech-to-text", self.base_url))
            .header("xi-api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(RemoteError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status));
        }

        let body: TranscriptionBody = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        debug!(chars = body.text.len(), "transcription received");
        Ok(body.text)
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioStream, RemoteError> {
        let payload = serde_json::json!({
            "text": text,
            "model_id": TTS_MODEL,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
            },
        });

        let response = self
            .http
            .post(format!("{}/text-to-speech/{voice_id}/stream", self.base_url))
            .header("xi-api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(RemoteError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RemoteError::Transport(e.to_string())));
        Ok(Box::pin(stream))
    }
}
