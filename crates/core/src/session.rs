//! Conversation session state and the per-connection session registry.
//!
//! A [`ConversationSession`] is owned by the connection task driving it;
//! the [`SessionRegistry`] only creates, looks up and retires sessions by
//! connection key and never mutates turn state itself.

use crate::feedback::{FeedbackBundle, OverallAssessment, UtteranceFeedback};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Agent => write!(f, "agent"),
        }
    }
}

/// One line of the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Vocabulary level chosen by the learner at the start of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// The vocabulary constraint block appended to a persona's system prompt.
    pub fn vocabulary_instruction(&self) -> &'static str {
        match self {
            Difficulty::Beginner => {
                "VOCABULARY LEVEL - BEGINNER:\n\
                 - Use ONLY very basic, everyday words that 10-year-old children understand\n\
                 - Examples: happy, sad, eat, play, friend, house, school\n\
                 - NEVER use idioms, metaphors, or figurative language\n\
                 - NEVER use phrasal verbs (like \"hang out\", \"come up with\")\n\
                 - Keep sentences very short and simple\n\
                 - Avoid any complex expressions"
            }
            Difficulty::Intermediate => {
                "VOCABULARY LEVEL - INTERMEDIATE:\n\
                 - Use high school level vocabulary only\n\
                 - Common words used in everyday conversation\n\
                 - AVOID idioms and figurative expressions\n\
                 - AVOID uncommon metaphors\n\
                 - Use clear, literal language\n\
                 - Keep expressions straightforward"
            }
            Difficulty::Advanced => {
                "VOCABULARY LEVEL - ADVANCED:\n\
                 - Use natural, fluent English\n\
                 - College-level vocabulary is acceptable\n\
                 - You may use common idioms sparingly\n\
                 - Express ideas naturally as a native speaker would"
            }
        }
    }

    /// Single-line variant folded into the suggestion prompt.
    pub fn short_instruction(&self) -> &'static str {
        match self {
            Difficulty::Beginner => {
                "Use VERY simple words that 10-year-old children understand. NO idioms, NO phrasal verbs."
            }
            Difficulty::Intermediate => {
                "Use high school level vocabulary. Clear and straightforward language."
            }
            Difficulty::Advanced => "Use natural, fluent English with college-level vocabulary.",
        }
    }

    /// Composes a persona prompt with this level's vocabulary constraints.
    pub fn apply_to_prompt(&self, base_prompt: &str) -> String {
        format!("{base_prompt}\n\n{}", self.vocabulary_instruction())
    }

    /// Canned conversation openers offered right after the level is chosen.
    pub fn initial_suggestions(&self) -> Vec<String> {
        let picks: [&str; 3] = match self {
            Difficulty::Beginner => ["I'm good, thanks!", "Pretty good.", "Not bad, how about you?"],
            Difficulty::Intermediate => [
                "I'm doing well, thanks for asking!",
                "Pretty good, just a bit tired.",
                "Not too bad. How about yourself?",
            ],
            Difficulty::Advanced => [
                "I'm doing great, thanks! How about you?",
                "Pretty good, though it's been a long day.",
                "Can't complain. What brings you here?",
            ],
        };
        picks.iter().map(|s| s.to_string()).collect()
    }

    /// Fallback suggestions when generation fails.
    pub fn fallback_suggestions(&self) -> Vec<String> {
        let picks: [&str; 3] = match self {
            Difficulty::Beginner => ["I like that!", "Tell me more.", "What about you?"],
            Difficulty::Intermediate => [
                "That's interesting.",
                "I see what you mean.",
                "How do you feel about it?",
            ],
            Difficulty::Advanced => [
                "That's a great point.",
                "I hadn't thought of it that way.",
                "What's your take on this?",
            ],
        };
        picks.iter().map(|s| s.to_string()).collect()
    }
}

impl FromStr for Difficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            _ => Err(()),
        }
    }
}

/// State for one connection's conversation.
#[derive(Debug)]
pub struct ConversationSession {
    session_id: Uuid,
    character_id: String,
    turn_count: u32,
    history: Vec<Utterance>,
    difficulty: Difficulty,
    difficulty_set: bool,
    feedback_items: Vec<UtteranceFeedback>,
    overall_assessment: Option<OverallAssessment>,
    is_completed: bool,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl ConversationSession {
    pub fn new(character_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            character_id: character_id.into(),
            turn_count: 0,
            history: Vec::new(),
            difficulty: Difficulty::default(),
            difficulty_set: false,
            feedback_items: Vec::new(),
            overall_assessment: None,
            is_completed: false,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn character_id(&self) -> &str {
        &self.character_id
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn history(&self) -> &[Utterance] {
        &self.history
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn feedback_items(&self) -> &[UtteranceFeedback] {
        &self.feedback_items
    }

    pub fn overall_assessment(&self) -> Option<&OverallAssessment> {
        self.overall_assessment.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Appends a user utterance and counts the turn.
    pub fn record_user_utterance(&mut self, text: impl Into<String>) {
        self.history.push(Utterance {
            speaker: Speaker::User,
            text: text.into(),
            timestamp: Utc::now(),
        });
        self.turn_count += 1;
    }

    /// Appends an agent utterance; does not affect the turn count.
    pub fn record_agent_utterance(&mut self, text: impl Into<String>) {
        self.history.push(Utterance {
            speaker: Speaker::Agent,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// Sets the difficulty once; later calls are ignored.
    ///
    /// Returns whether the value was applied.
    pub fn set_difficulty(&mut self, difficulty: Difficulty) -> bool {
        if self.difficulty_set {
            return false;
        }
        self.difficulty = difficulty;
        self.difficulty_set = true;
        true
    }

    pub fn add_feedback(&mut self, item: UtteranceFeedback) {
        self.feedback_items.push(item);
    }

    /// Sets the overall assessment once; later calls are ignored.
    pub fn set_overall_assessment(&mut self, assessment: OverallAssessment) {
        if self.overall_assessment.is_none() {
            self.overall_assessment = Some(assessment);
        }
    }

    /// Marks the session completed. Idempotent: the first call fixes
    /// `ended_at`, later calls change nothing.
    pub fn complete(&mut self) {
        if !self.is_completed {
            self.is_completed = true;
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn feedback_bundle(&self) -> FeedbackBundle {
        FeedbackBundle {
            feedback_items: self.feedback_items.clone(),
            overall_assessment: self.overall_assessment.clone(),
        }
    }
}

pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Creates, looks up and retires sessions keyed by connection identity.
///
/// No ambient singleton: each service instance owns one registry, so tests
/// get isolated instances.
#[derive(Default)]
pub struct SessionRegistry {
    inner: std::sync::Mutex<HashMap<Uuid, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, character_id: &str, connection_key: Uuid) -> SharedSession {
        let session = Arc::new(Mutex::new(ConversationSession::new(character_id)));
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .insert(connection_key, session.clone());
        session
    }

    pub fn get(&self, connection_key: Uuid) -> Option<SharedSession> {
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .get(&connection_key)
            .cloned()
    }

    /// Removes the session for a connection, marking it completed if the
    /// conversation never reached its natural end. The caller persists the
    /// returned session as part of teardown.
    pub async fn retire(&self, connection_key: Uuid) -> Option<SharedSession> {
        let session = self
            .inner
            .lock()
            .expect("session registry lock poisoned")
            .remove(&connection_key)?;
        session.lock().await.complete();
        Some(session)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_count_tracks_user_utterances_only() {
        let mut session = ConversationSession::new("jeongsu");
        session.record_agent_utterance("Hey! Come on in.");
        assert_eq!(session.turn_count(), 0);

        session.record_user_utterance("Hi, my day was fine.");
        session.record_agent_utterance("Glad to hear it!");
        session.record_user_utterance("How about yours?");
        assert_eq!(session.turn_count(), 2);

        let user_turns = session
            .history()
            .iter()
            .filter(|u| u.speaker == Speaker::User)
            .count();
        assert_eq!(session.turn_count() as usize, user_turns);
    }

    #[test]
    fn history_preserves_insertion_order() {
        let mut session = ConversationSession::new("subin");
        session.record_agent_utterance("first");
        session.record_user_utterance("second");
        session.record_agent_utterance("third");
        let texts: Vec<&str> = session.history().iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn completion_is_idempotent() {
        let mut session = ConversationSession::new("jihoon");
        session.complete();
        assert!(session.is_completed());
        let first_end = session.ended_at();
        session.complete();
        assert_eq!(session.ended_at(), first_end);
    }

    #[test]
    fn difficulty_is_settable_once() {
        let mut session = ConversationSession::new("jeongsu");
        assert_eq!(session.difficulty(), Difficulty::Intermediate);
        assert!(session.set_difficulty(Difficulty::Beginner));
        assert!(!session.set_difficulty(Difficulty::Advanced));
        assert_eq!(session.difficulty(), Difficulty::Beginner);
    }

    #[test]
    fn overall_assessment_is_set_at_most_once() {
        use crate::feedback::AssessmentScores;
        let mut session = ConversationSession::new("jeongsu");
        let first = OverallAssessment {
            strengths: "clear answers".into(),
            main_weaknesses: "articles".into(),
            actionable_advice: "review a/an/the".into(),
            encouragement: "keep going".into(),
            scores: AssessmentScores {
                grammar: 80,
                fluency: 85,
            },
        };
        session.set_overall_assessment(first.clone());
        let mut second = first.clone();
        second.strengths = "overwritten".into();
        session.set_overall_assessment(second);
        assert_eq!(session.overall_assessment(), Some(&first));
    }

    #[test]
    fn difficulty_parses_from_wire_strings() {
        assert_eq!("beginner".parse(), Ok(Difficulty::Beginner));
        assert_eq!("advanced".parse(), Ok(Difficulty::Advanced));
        assert!("expert".parse::<Difficulty>().is_err());
    }

    #[test]
    fn prompt_composition_appends_vocabulary_block() {
        let prompt = Difficulty::Beginner.apply_to_prompt("You are a friendly teacher.");
        assert!(prompt.starts_with("You are a friendly teacher."));
        assert!(prompt.contains("VOCABULARY LEVEL - BEGINNER"));
    }

    #[tokio::test]
    async fn registry_retire_completes_unfinished_sessions() {
        let registry = SessionRegistry::new();
        let key = Uuid::new_v4();
        let session = registry.create("jeongsu", key);
        session.lock().await.record_user_utterance("hello");
        assert_eq!(registry.active_count(), 1);

        let retired = registry.retire(key).await.expect("session present");
        assert!(retired.lock().await.is_completed());
        assert_eq!(registry.active_count(), 0);
        assert!(registry.get(key).is_none());
    }

    #[tokio::test]
    async fn registry_retire_is_a_noop_for_unknown_keys() {
        let registry = SessionRegistry::new();
        assert!(registry.retire(Uuid::new_v4()).await.is_none());
    }
}
