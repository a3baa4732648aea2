//! Data Access Layer
//!
//! Postgres implementation of the durable session store. Queries are
//! runtime-bound; the schema is managed through embedded `sqlx` migrations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::feedback::FeedbackBundle;
use parley_core::session::{Difficulty, Utterance};
use parley_core::store::{NewSessionRecord, SessionReport, SessionStore};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, record: NewSessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, character_id, user_ip, user_agent, fingerprint, difficulty)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.session_id)
        .bind(&record.character_id)
        .bind(&record.user_ip)
        .bind(&record.user_agent)
        .bind(&record.fingerprint)
        .bind(record.difficulty.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_fingerprint(&self, session_id: Uuid, fingerprint: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET fingerprint = $1 WHERE session_id = $2")
            .bind(fingerprint)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_difficulty(&self, session_id: Uuid, difficulty: Difficulty) -> Result<()> {
        sqlx::query("UPDATE sessions SET difficulty = $1 WHERE session_id = $2")
            .bind(difficulty.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_turn_count(&self, session_id: Uuid, turn_count: u32) -> Result<()> {
        sqlx::query("UPDATE sessions SET turn_count = $1 WHERE session_id = $2")
            .bind(turn_count as i32)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        session_id: Uuid,
        history: &[Utterance],
        feedback: &FeedbackBundle,
    ) -> Result<()> {
        let history_json = serde_json::to_value(history)?;
        let feedback_json = serde_json::to_value(feedback)?;
        sqlx::query(
            r#"
            UPDATE sessions
            SET is_completed = TRUE,
                ended_at = NOW(),
                conversation_history = $2,
                feedback_data = $3
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(history_json)
        .bind(feedback_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_blocked(&self, session_id: Uuid) -> Result<bool> {
        let blocked: Option<bool> =
            sqlx::query_scalar("SELECT is_blocked FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blocked.unwrap_or(false))
    }

    async fn has_ever_completed(&self, fingerprint: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE fingerprint = $1 AND is_completed = TRUE)",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn fetch_report(&self, session_id: Uuid) -> Result<Option<SessionReport>> {
        let row = sqlx::query(
            r#"
            SELECT character_id, turn_count, is_completed, started_at, ended_at,
                   conversation_history, feedback_data
            FROM sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let history: Vec<Utterance> = row
            .try_get::<Option<serde_json::Value>, _>("conversation_history")?
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let feedback: FeedbackBundle = row
            .try_get::<Option<serde_json::Value>, _>("feedback_data")?
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        Ok(Some(SessionReport {
            session_id,
            character_id: row.try_get("character_id")?,
            turn_count: row.try_get::<i32, _>("turn_count")? as u32,
            is_completed: row.try_get("is_completed")?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            ended_at: row.try_get::<Option<DateTime<Utc>>, _>("ended_at")?,
            history,
            feedback,
        }))
    }
}
