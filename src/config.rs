use std::env;

pub const DEFAULT_QUESTIONS_PER_QUIZ: usize = 5;

/// Topics offered on the start screen. `SessionController::start` rejects
/// anything outside the configured list, so free-text topics never reach
/// the generator.
pub const MATH_TOPICS: &[&str] = &[
    "Sets",
    "Trigonometry",
    "Complex Numbers",
    "Permutations and Combinations",
    "Sequences and Series",
    "Straight Lines",
    "Limits and Derivatives",
    "Probability",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub questions_per_quiz: usize,
    pub topics: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let api_key = env::var("CHATGPT_API_KEY").ok();
        if api_key.is_none() {
            log::warn!("CHATGPT_API_KEY is not set; question generation will fail until it is");
        }

        let questions_per_quiz = env::var("QUESTIONS_PER_QUIZ")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&count| count > 0)
            .unwrap_or(DEFAULT_QUESTIONS_PER_QUIZ);

        Self {
            api_key,
            questions_per_quiz,
            topics: MATH_TOPICS.iter().map(|topic| topic.to_string()).collect(),
        }
    }
}
