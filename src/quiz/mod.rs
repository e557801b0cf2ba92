pub mod generator;
pub mod session;

pub const OPTIONS_PER_QUESTION: usize = 4;

/// A multiple-choice question accepted into a session. `answer` is always
/// one of `options`; once validated the question is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// One candidate item exactly as the provider returned it. Every field
/// defaults, so a record with a missing field still deserializes and gets
/// rejected by `validate` instead of failing the whole batch.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RawQuestion {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub answer: String,
}

impl RawQuestion {
    /// Accepts the candidate only if it has a non-empty question, exactly
    /// four options and an answer matching one of them (case-sensitive).
    pub fn validate(self) -> Option<Question> {
        if self.question.is_empty() || self.answer.is_empty() {
            return None;
        }
        if self.options.len() != OPTIONS_PER_QUESTION {
            return None;
        }
        if !self.options.contains(&self.answer) {
            return None;
        }
        Some(Question {
            question: self.question,
            options: self.options,
            answer: self.answer,
        })
    }
}
