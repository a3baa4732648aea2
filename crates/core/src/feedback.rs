//! Per-utterance feedback and end-of-session assessment shapes.
//!
//! These mirror the JSON the language model is prompted to emit; the
//! evaluator returns one [`UtteranceFeedback`] per flagged utterance and
//! nothing for clean ones.

use serde::{Deserialize, Serialize};

/// One flagged issue dimension within an utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IssueDetail {
    #[serde(default)]
    pub has_issue: bool,
    /// The corrected or more natural phrasing, when flagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Evaluation result for a single user utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtteranceFeedback {
    pub user_sentence: String,
    #[serde(default)]
    pub grammar_issue: IssueDetail,
    #[serde(default)]
    pub naturalness_issue: IssueDetail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AssessmentScores {
    pub grammar: u8,
    pub fluency: u8,
}

/// Whole-session assessment, computed once from the collected feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverallAssessment {
    pub strengths: String,
    pub main_weaknesses: String,
    pub actionable_advice: String,
    pub encouragement: String,
    pub scores: AssessmentScores,
}

/// What session completion persists alongside the transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackBundle {
    pub feedback_items: Vec<UtteranceFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_assessment: Option<OverallAssessment>,
}

/// Strips a Markdown code fence from a model response, if present.
///
/// Models frequently wrap JSON answers in ```json fences despite being told
/// not to; the payload inside is what gets parsed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Extracts the first top-level JSON array from a model response.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let text = strip_code_fence(text);
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_round_trips_through_json() {
        let item = UtteranceFeedback {
            user_sentence: "I want go school".into(),
            grammar_issue: IssueDetail {
                has_issue: true,
                corrected: Some("I want to go to school".into()),
                suggestion: None,
                explanation: Some("missing 'to'".into()),
            },
            naturalness_issue: IssueDetail::default(),
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: UtteranceFeedback = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn missing_issue_objects_default_to_clean() {
        let parsed: UtteranceFeedback =
            serde_json::from_str(r#"{"user_sentence": "Hello there"}"#).unwrap();
        assert!(!parsed.grammar_issue.has_issue);
        assert!(!parsed.naturalness_issue.has_issue);
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn json_array_is_extracted_from_surrounding_prose() {
        let raw = "Here you go: [\"a\", \"b\", \"c\"] — hope that helps!";
        assert_eq!(extract_json_array(raw), Some("[\"a\", \"b\", \"c\"]"));
        assert_eq!(extract_json_array("no array here"), None);
    }
}
