//! Keyword-based emotion classification for agent replies.
//!
//! The displayed persona image follows the emotion read off the reply text.
//! Classification is a pure function: fixed priority order, first match
//! wins, case-insensitive containment.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Excited,
    Surprised,
    Thoughtful,
    Smile,
    Neutral,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Excited => "excited",
            Emotion::Surprised => "surprised",
            Emotion::Thoughtful => "thoughtful",
            Emotion::Smile => "smile",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const EXCITED: &[&str] = &[
    "excited",
    "thrilled",
    "can't wait",
    "amazing",
    "awesome",
    "fantastic",
    "incredible",
];

const SURPRISED: &[&str] = &[
    "wow",
    "really?",
    "seriously?",
    "no way",
    "oh my",
    "surprised",
    "shocking",
    "unbelievable",
];

const THOUGHTFUL: &[&str] = &[
    "hmm",
    "let me think",
    "interesting",
    "i see",
    "that's a good",
    "wondering",
    "curious",
    "consider",
];

const SMILE: &[&str] = &[
    "happy", "glad", "great", "good", "nice", "wonderful", "pleased", "haha", "lol", "😊",
];

/// Classifies the emotion displayed by a reply.
///
/// Priority: excited > surprised > thoughtful > smile > neutral.
pub fn classify(text: &str) -> Emotion {
    let lowered = text.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));

    if contains_any(EXCITED) {
        Emotion::Excited
    } else if contains_any(SURPRISED) {
        Emotion::Surprised
    } else if contains_any(THOUGHTFUL) {
        Emotion::Thoughtful
    } else if contains_any(SMILE) {
        Emotion::Smile
    } else {
        Emotion::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_neutral() {
        assert_eq!(classify("The weather is fine today."), Emotion::Neutral);
    }

    #[test]
    fn each_category_matches_its_keywords() {
        assert_eq!(classify("That's absolutely amazing!"), Emotion::Excited);
        assert_eq!(classify("Wow, I did not expect that."), Emotion::Surprised);
        assert_eq!(classify("Hmm, give me a second."), Emotion::Thoughtful);
        assert_eq!(classify("I'm so glad you came."), Emotion::Smile);
    }

    #[test]
    fn priority_order_wins_over_later_categories() {
        // Contains both an excited keyword and a smile keyword.
        assert_eq!(classify("I'm thrilled, so happy for you!"), Emotion::Excited);
        // Surprised beats thoughtful.
        assert_eq!(classify("No way... interesting."), Emotion::Surprised);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify("FANTASTIC game last night"), Emotion::Excited);
    }

    #[test]
    fn wire_format_is_lowercase() {
        assert_eq!(serde_json::to_string(&Emotion::Thoughtful).unwrap(), "\"thoughtful\"");
    }
}
