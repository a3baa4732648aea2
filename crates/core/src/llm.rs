//! Language-model capability seam: reply generation, suggested responses,
//! per-utterance evaluation and the end-of-session assessment.

use crate::feedback::{
    OverallAssessment, UtteranceFeedback, extract_json_array, strip_code_fence,
};
use crate::session::{Difficulty, Speaker, Utterance};
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

/// A generic client for the conversational language model.
#[async_trait]
pub trait LanguageClient: Send + Sync {
    /// Generates the persona's reply to `user_text`, given the prompt and
    /// the history as it stood before this turn.
    async fn respond(
        &self,
        system_prompt: &str,
        history: &[Utterance],
        user_text: &str,
    ) -> Result<String>;

    /// Suggests up to three short things the learner could say next.
    /// Falls back to canned per-difficulty suggestions when generation or
    /// parsing fails.
    async fn suggest(
        &self,
        history: &[Utterance],
        persona_name: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<String>>;

    /// Evaluates one user utterance; `None` means nothing worth flagging.
    async fn evaluate(&self, user_text: &str) -> Result<Option<UtteranceFeedback>>;

    /// Summarizes the collected feedback into an overall assessment.
    async fn assess(&self, items: &[UtteranceFeedback]) -> Result<OverallAssessment>;
}

const EVALUATION_PROMPT: &str = r#"You are an expert English teacher. Analyze the following student's English sentence from a SPOKEN CONVERSATION.

Student's sentence: "{user_text}"

Evaluate the sentence for:

1. **Grammar Issue**:
   - ONLY if there's an actual grammar error (wrong tense, subject-verb agreement, wrong article, etc.)
   - Example: "I want go school" -> wrong (missing "to")
   - Example: "She don't like it" -> wrong (should be "doesn't")

2. **Naturalness Issue**:
   - Grammatically correct but sounds awkward/unnatural to native speakers
   - Better native-like alternatives exist

CRITICAL RULES FOR SPOKEN CONVERSATION:
- DO NOT flag conversational/colloquial expressions as grammar errors
- Short answers like "Absolutely, pork" or "Sure, coffee" are NATURAL in conversation
- Fragment answers in response to questions are ACCEPTABLE
- Ellipsis (omitting subject/verb when context is clear) is NORMAL in spoken English
- Only flag ACTUAL errors that would confuse meaning or sound wrong to native speakers

IMPORTANT:
- Be LENIENT with spoken conversation style
- If the sentence is natural for spoken conversation, set has_issues to false
- Provide explanations in Korean

Respond in JSON format:
{
  "has_issues": true/false,
  "user_sentence": "{user_text}",
  "grammar_issue": {
    "has_issue": true/false,
    "corrected": "corrected version (only if has_issue is true)",
    "explanation": "Korean explanation (only if has_issue is true)"
  },
  "naturalness_issue": {
    "has_issue": true/false,
    "suggestion": "more natural expression (only if has_issue is true)",
    "explanation": "Korean explanation (only if has_issue is true)"
  }
}"#;

/// An implementation of [`LanguageClient`] for any OpenAI-compatible API
/// (OpenRouter in production).
pub struct OpenRouterClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenRouterClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(max_tokens)
            .temperature(temperature)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;
        Ok(content.trim().to_string())
    }
}

/// Renders recent history as `Speaker: text` lines for prompt embedding.
fn format_history(history: &[Utterance], persona_name: &str, last: usize) -> String {
    let start = history.len().saturating_sub(last);
    history[start..]
        .iter()
        .map(|u| {
            let speaker = match u.speaker {
                Speaker::User => "You",
                Speaker::Agent => persona_name,
            };
            format!("{speaker}: {}\n", u.text)
        })
        .collect()
}

/// Parses the suggestion array out of a model response, topping up and
/// truncating to exactly three entries.
fn parse_suggestions(raw: &str) -> Option<Vec<String>> {
    let json = extract_json_array(raw)?;
    let mut suggestions: Vec<String> = serde_json::from_str(json).ok()?;
    const TOP_UP: [&str; 3] = ["Tell me more", "That's interesting", "What about you?"];
    for filler in TOP_UP {
        if suggestions.len() >= 3 {
            break;
        }
        suggestions.push(filler.to_string());
    }
    suggestions.truncate(3);
    Some(suggestions)
}

#[derive(Deserialize)]
struct EvaluationBody {
    #[serde(default)]
    has_issues: bool,
    #[serde(flatten)]
    feedback: UtteranceFeedback,
}

#[async_trait]
impl LanguageClient for OpenRouterClient {
    async fn respond(
        &self,
        system_prompt: &str,
        history: &[Utterance],
        user_text: &str,
    ) -> Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
        ];
        for utterance in history {
            match utterance.speaker {
                Speaker::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(utterance.text.clone())
                        .build()?
                        .into(),
                ),
                Speaker::Agent => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(utterance.text.clone())
                        .build()?
                        .into(),
                ),
            }
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()?
                .into(),
        );

        self.chat(messages, 100, 0.7).await
    }

    async fn suggest(
        &self,
        history: &[Utterance],
        persona_name: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<String>> {
        let history_text = format_history(history, persona_name, 6);
        let prompt = format!(
            "Based on this conversation, suggest 3 short, natural responses the user could say next.\n\n\
             Conversation so far:\n{history_text}\n\
             Requirements:\n\
             - Each response should be 5-10 words maximum\n\
             - Make them natural and conversational\n\
             - Vary the responses (question, statement, follow-up)\n\
             - {}\n\
             - Return ONLY a JSON array of 3 strings, nothing else\n\n\
             Example format: [\"Response 1\", \"Response 2\", \"Response 3\"]",
            difficulty.short_instruction()
        );

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(
                    "You are a helpful assistant that generates natural conversation \
                     suggestions. Return only valid JSON.",
                )
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];

        match self.chat(messages, 150, 0.8).await {
            Ok(raw) => match parse_suggestions(&raw) {
                Some(suggestions) => Ok(suggestions),
                None => {
                    warn!(raw = %raw, "suggestion response was not a JSON array, using fallback");
                    Ok(difficulty.fallback_suggestions())
                }
            },
            Err(err) => {
                warn!(error = ?err, "suggestion generation failed, using fallback");
                Ok(difficulty.fallback_suggestions())
            }
        }
    }

    async fn evaluate(&self, user_text: &str) -> Result<Option<UtteranceFeedback>> {
        let prompt = EVALUATION_PROMPT.replace("{user_text}", user_text);
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content("You are an expert English teacher. Respond only in valid JSON format.")
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];

        let raw = self.chat(messages, 500, 0.5).await?;
        let body: EvaluationBody = serde_json::from_str(strip_code_fence(&raw))
            .context("evaluation response was not valid JSON")?;
        Ok(body.has_issues.then_some(body.feedback))
    }

    async fn assess(&self, items: &[UtteranceFeedback]) -> Result<OverallAssessment> {
        let mut grammar_count = 0usize;
        let mut naturalness_count = 0usize;
        let mut details = Vec::new();
        for item in items {
            let mut issues = Vec::new();
            if item.grammar_issue.has_issue {
                grammar_count += 1;
                issues.push(format!(
                    "grammar: '{}' ({})",
                    item.grammar_issue.corrected.as_deref().unwrap_or(""),
                    item.grammar_issue.explanation.as_deref().unwrap_or(""),
                ));
            }
            if item.naturalness_issue.has_issue {
                naturalness_count += 1;
                issues.push(format!(
                    "naturalness: '{}' ({})",
                    item.naturalness_issue.suggestion.as_deref().unwrap_or(""),
                    item.naturalness_issue.explanation.as_deref().unwrap_or(""),
                ));
            }
            if !issues.is_empty() {
                details.push(format!("  - \"{}\" -> {}", item.user_sentence, issues.join(", ")));
            }
        }
        let feedback_summary = if details.is_empty() {
            "  (every sentence was clean)".to_string()
        } else {
            details.join("\n")
        };

        let prompt = format!(
            "You are an expert English teacher analyzing a student's conversation performance.\n\n\
             **Collected Feedback Details:**\n\n\
             Total Issues Found:\n\
             - Grammar issues: {grammar_count}\n\
             - Naturalness issues: {naturalness_count}\n\n\
             Detailed Feedback:\n{feedback_summary}\n\n\
             **Task:**\n\
             Analyze the patterns in the feedback above and identify the student's main \
             weaknesses. Look for patterns: repeated tense errors, article usage, preposition \
             mistakes, awkward sentence structure, vocabulary choice. Provide an insightful \
             analysis in Korean:\n\n\
             1. **Strengths**: What did the student do well?\n\
             2. **Main Weaknesses**: Specific patterns this student needs to focus on.\n\
             3. **Actionable Advice**: Concrete steps to improve.\n\
             4. **Encouragement**: A warm, motivating message.\n\n\
             Also provide scores (0-100):\n\
             - Grammar score: based on severity and frequency of grammar errors\n\
             - Fluency score: based on naturalness and expression issues\n\n\
             Respond in JSON format:\n\
             {{\n\
               \"strengths\": \"...\",\n\
               \"main_weaknesses\": \"...\",\n\
               \"actionable_advice\": \"...\",\n\
               \"encouragement\": \"...\",\n\
               \"scores\": {{ \"grammar\": 0, \"fluency\": 0 }}\n\
             }}"
        );

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(
                    "You are an expert English teacher who identifies learning patterns. \
                     Respond in valid JSON format.",
                )
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];

        let raw = self.chat(messages, 1000, 0.7).await?;
        serde_json::from_str(strip_code_fence(&raw))
            .context("assessment response was not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn utterance(speaker: Speaker, text: &str) -> Utterance {
        Utterance {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn history_formatting_uses_persona_name_and_window() {
        let history = vec![
            utterance(Speaker::Agent, "old line"),
            utterance(Speaker::Agent, "Hey! How's your day?"),
            utterance(Speaker::User, "Pretty good."),
        ];
        let text = format_history(&history, "Jeongsu", 2);
        assert_eq!(text, "Jeongsu: Hey! How's your day?\nYou: Pretty good.\n");
    }

    #[test]
    fn suggestions_parse_from_plain_array() {
        let parsed = parse_suggestions(r#"["One", "Two", "Three"]"#).unwrap();
        assert_eq!(parsed, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn suggestions_parse_from_fenced_and_padded_responses() {
        let parsed = parse_suggestions("```json\n[\"Only one\"]\n```").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], "Only one");
        assert_eq!(parsed[1], "Tell me more");
    }

    #[test]
    fn suggestions_truncate_to_three() {
        let parsed = parse_suggestions(r#"["a", "b", "c", "d", "e"]"#).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn non_array_response_yields_none() {
        assert!(parse_suggestions("I'd suggest asking about hobbies.").is_none());
    }

    #[test]
    fn evaluation_body_without_issues_maps_to_none() {
        let raw = r#"{"has_issues": false, "user_sentence": "Sounds good."}"#;
        let body: EvaluationBody = serde_json::from_str(raw).unwrap();
        assert!(!body.has_issues);
        assert_eq!(body.feedback.user_sentence, "Sounds good.");
    }

    #[test]
    fn evaluation_body_with_issues_carries_detail() {
        let raw = r#"{
            "has_issues": true,
            "user_sentence": "I want go school",
            "grammar_issue": {
                "has_issue": true,
                "corrected": "I want to go to school",
                "explanation": "missing to"
            },
            "naturalness_issue": { "has_issue": false }
        }"#;
        let body: EvaluationBody = serde_json::from_str(raw).unwrap();
        assert!(body.has_issues);
        assert!(body.feedback.grammar_issue.has_issue);
        assert_eq!(
            body.feedback.grammar_issue.corrected.as_deref(),
            Some("I want to go to school")
        );
    }
}
