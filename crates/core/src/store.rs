//! Durable storage seam for session records.
//!
//! The orchestration core consumes storage through this trait; the service
//! crate provides the Postgres implementation and tests substitute mocks.

use crate::feedback::FeedbackBundle;
use crate::session::{Difficulty, Utterance};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Fields captured when a connection opens.
#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub session_id: Uuid,
    pub character_id: String,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
    pub fingerprint: Option<String>,
    pub difficulty: Difficulty,
}

/// Everything persisted about a finished session, for the report endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub character_id: String,
    pub turn_count: u32,
    pub is_completed: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub history: Vec<Utterance>,
    pub feedback: FeedbackBundle,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, record: NewSessionRecord) -> Result<()>;

    async fn set_fingerprint(&self, session_id: Uuid, fingerprint: &str) -> Result<()>;

    async fn set_difficulty(&self, session_id: Uuid, difficulty: Difficulty) -> Result<()>;

    /// Persists the turn counter; called synchronously after every counted
    /// turn so accounting survives a crash mid-pipeline.
    async fn update_turn_count(&self, session_id: Uuid, turn_count: u32) -> Result<()>;

    /// Marks the session completed and stores the transcript and feedback.
    async fn mark_completed(
        &self,
        session_id: Uuid,
        history: &[Utterance],
        feedback: &FeedbackBundle,
    ) -> Result<()>;

    /// Whether this session has been administratively blocked.
    async fn is_blocked(&self, session_id: Uuid) -> Result<bool>;

    /// Whether any session under this fingerprint ever completed. The
    /// permanent access-block signal.
    async fn has_ever_completed(&self, fingerprint: &str) -> Result<bool>;

    async fn fetch_report(&self, session_id: Uuid) -> Result<Option<SessionReport>>;
}
