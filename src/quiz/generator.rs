use std::time::Duration;

use chatgpt::client::ChatGPT;
use chatgpt::config::ChatGPTEngine;
use chatgpt::types::CompletionResponse;

use crate::quiz::{Question, RawQuestion, OPTIONS_PER_QUESTION};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything that can go wrong while producing a batch of questions. Each
/// variant carries its own user-facing message; the bot shows whichever one
/// applies on the start screen and otherwise treats them all the same.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("The quiz generator is not configured. Ask the bot owner to set CHATGPT_API_KEY.")]
    Configuration,
    #[error("Could not reach the question service. Please try again in a moment.")]
    ProviderUnavailable(#[source] chatgpt::err::Error),
    #[error("The question service replied with something unreadable. Please try again.")]
    MalformedResponse,
    #[error("No usable questions came back. Try again or pick another topic.")]
    EmptyResult,
}

#[derive(Debug, serde::Deserialize)]
struct ProviderReply {
    questions: Vec<RawQuestion>,
}

/// Turns a topic into a batch of validated questions with a single call to
/// the model. No retries here; the user retries by starting again.
pub struct QuizGenerator {
    api_key: Option<String>,
}

impl QuizGenerator {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }

    pub async fn fetch_questions(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<Question>, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::Configuration)?;

        let client = {
            let mut client = ChatGPT::new(api_key).map_err(|err| {
                log::error!("ChatGPT client rejected the configured credentials: {err}");
                GenerationError::Configuration
            })?;
            client.config.engine = ChatGPTEngine::Gpt35Turbo;
            client.config.timeout = PROVIDER_TIMEOUT;
            client
        };

        log::debug!("Requesting {count} questions about {topic:?}");
        let response: CompletionResponse = client
            .send_message(build_prompt(topic, count))
            .await
            .map_err(GenerationError::ProviderUnavailable)?;

        let questions = parse_questions(&response.message().content)?;
        if questions.len() < count {
            // The model sometimes under-delivers; the session simply runs
            // with the shorter batch.
            log::warn!(
                "Asked for {count} questions about {topic:?} but only {} validated",
                questions.len()
            );
        }
        Ok(questions)
    }
}

fn build_prompt(topic: &str, count: usize) -> String {
    format!(
        "Generate {count} multiple-choice questions for a Class 11th Maths student \
         on the topic of \"{topic}\". Each question must have exactly {OPTIONS_PER_QUESTION} \
         options, and the answer must be one of the options.\n\
         Reply with JSON only, no commentary, in exactly this shape:\n\
         {{\"questions\": [{{\"question\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \"answer\": \"...\"}}]}}\n\
         The fields question, options and answer are required on every item."
    )
}

/// The pure half of the adapter: pull the JSON document out of the reply,
/// parse it, and keep only the candidates that validate. Bad candidates are
/// dropped one by one; only a reply with nothing salvageable is an error.
fn parse_questions(reply: &str) -> Result<Vec<Question>, GenerationError> {
    let json = extract_json(reply).ok_or(GenerationError::MalformedResponse)?;
    let reply: ProviderReply = serde_json::from_str(json).map_err(|err| {
        log::debug!("Provider reply failed to parse: {err}");
        GenerationError::MalformedResponse
    })?;

    let total = reply.questions.len();
    let questions: Vec<Question> = reply
        .questions
        .into_iter()
        .filter_map(RawQuestion::validate)
        .collect();
    if questions.len() < total {
        log::debug!("Dropped {} malformed candidates", total - questions.len());
    }

    if questions.is_empty() {
        return Err(GenerationError::EmptyResult);
    }
    Ok(questions)
}

// Models tend to wrap their JSON in markdown fences or lead-in text; take
// the outermost braces and ignore the rest.
fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}
