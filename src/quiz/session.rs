use std::sync::atomic::{AtomicU64, Ordering};

use crate::quiz::generator::GenerationError;
use crate::quiz::Question;

// Tokens come from one process-wide counter rather than a per-controller
// one: the bot replaces the controller on restart, and a ticket issued
// before the replacement must never collide with one issued after.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

fn fresh_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Start,
    Playing,
    Finished,
}

/// All session-scoped data for one play-through. Only the controller below
/// ever mutates it; a finished session is replaced, never reset in place.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    state: SessionState,
    questions: Vec<Question>,
    current_index: usize,
    score: usize,
    answered: bool,
    last_error: Option<String>,
}

impl QuizSession {
    fn new() -> Self {
        Self {
            state: SessionState::Start,
            questions: Vec::new(),
            current_index: 0,
            score: 0,
            answered: false,
            last_error: None,
        }
    }
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Handed out by [`SessionController::start`]. The token identifies one
/// generation attempt, so a result arriving after a restart can be told
/// apart from the current one and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTicket {
    pub token: u64,
    pub topic: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejected {
    NotAtStart,
    AlreadyLoading,
    UnknownTopic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerVerdict {
    Correct,
    Incorrect { correct_answer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    NextQuestion,
    Finished,
}

/// The state machine authority for one quiz session. Guarded intents that
/// arrive out of turn are absorbed as no-ops (`None`/`Err`), never errors
/// shown to the user, and never leave the session half-updated.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionController {
    topics: Vec<String>,
    questions_per_quiz: usize,
    session: QuizSession,
    pending: Option<u64>,
}

impl SessionController {
    pub fn new(topics: Vec<String>, questions_per_quiz: usize) -> Self {
        Self {
            topics,
            questions_per_quiz,
            session: QuizSession::new(),
            pending: None,
        }
    }

    /// Begins a play-through: checks the topic against the configured list,
    /// enters the loading sub-state and issues a ticket for the generation
    /// call. At most one generation call can be outstanding at a time.
    pub fn start(&mut self, topic: &str) -> Result<StartTicket, StartRejected> {
        if self.session.state != SessionState::Start {
            return Err(StartRejected::NotAtStart);
        }
        if self.pending.is_some() {
            return Err(StartRejected::AlreadyLoading);
        }
        if topic.is_empty() || !self.topics.iter().any(|t| t == topic) {
            return Err(StartRejected::UnknownTopic);
        }

        let token = fresh_token();
        self.pending = Some(token);
        self.session.last_error = None;

        Ok(StartTicket {
            token,
            topic: topic.to_owned(),
            count: self.questions_per_quiz,
        })
    }

    /// Applies the outcome of the generation call issued under `token`.
    /// Returns `false` when the result is stale (a restart happened in the
    /// meantime), in which case nothing changes. A batch shorter than
    /// requested is accepted as-is; an empty one counts as a failure.
    pub fn finish_start(
        &mut self,
        token: u64,
        result: Result<Vec<Question>, GenerationError>,
    ) -> bool {
        if self.pending != Some(token) {
            return false;
        }
        self.pending = None;

        match result {
            Ok(questions) if !questions.is_empty() => {
                self.session = QuizSession {
                    state: SessionState::Playing,
                    questions,
                    current_index: 0,
                    score: 0,
                    answered: false,
                    last_error: None,
                };
            }
            Ok(_) => {
                self.session = QuizSession {
                    last_error: Some(GenerationError::EmptyResult.to_string()),
                    ..QuizSession::new()
                };
            }
            Err(err) => {
                self.session = QuizSession {
                    last_error: Some(err.to_string()),
                    ..QuizSession::new()
                };
            }
        }
        true
    }

    /// Scores the choice against the current question. A second submission
    /// for the same question is a no-op, so double-taps cannot double-score.
    pub fn answer(&mut self, choice: &str) -> Option<AnswerVerdict> {
        if self.session.state != SessionState::Playing || self.session.answered {
            return None;
        }
        let question = &self.session.questions[self.session.current_index];
        self.session.answered = true;
        if choice == question.answer {
            self.session.score += 1;
            Some(AnswerVerdict::Correct)
        } else {
            Some(AnswerVerdict::Incorrect {
                correct_answer: question.answer.clone(),
            })
        }
    }

    /// Advances past an answered question: by exactly one position, or to
    /// the finished state on the last question. Rejected (no-op) while the
    /// current question is unanswered; the UI disabling its button is not
    /// trusted to enforce that.
    pub fn next(&mut self) -> Option<Advance> {
        if self.session.state != SessionState::Playing || !self.session.answered {
            return None;
        }
        if self.session.current_index + 1 < self.session.questions.len() {
            self.session.current_index += 1;
            self.session.answered = false;
            Some(Advance::NextQuestion)
        } else {
            self.session.state = SessionState::Finished;
            Some(Advance::Finished)
        }
    }

    /// Replaces the session with a fresh one and invalidates any pending
    /// generation token; a result still in flight will be dropped by
    /// [`finish_start`](Self::finish_start).
    pub fn restart(&mut self) {
        self.session = QuizSession::new();
        self.pending = None;
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_token(&self) -> Option<u64> {
        self.pending
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.session.state != SessionState::Playing {
            return None;
        }
        self.session.questions.get(self.session.current_index)
    }

    /// Whether the current question has already been answered.
    pub fn is_answered(&self) -> bool {
        self.session.state == SessionState::Playing && self.session.answered
    }

    /// 1-based, for progress display.
    pub fn question_number(&self) -> usize {
        self.session.current_index + 1
    }

    pub fn total_questions(&self) -> usize {
        self.session.questions.len()
    }

    pub fn is_last_question(&self) -> bool {
        self.session.state == SessionState::Playing
            && self.session.current_index + 1 == self.session.questions.len()
    }

    pub fn score(&self) -> usize {
        self.session.score
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str, answer: &str) -> Question {
        let mut options = vec![
            "10".to_string(),
            "20".to_string(),
            "30".to_string(),
            "40".to_string(),
        ];
        options[0] = answer.to_string();
        Question {
            question: text.to_string(),
            options,
            answer: answer.to_string(),
        }
    }

    fn questions(count: usize) -> Vec<Question> {
        (0..count)
            .map(|i| question(&format!("Question {}", i + 1), &format!("answer {}", i + 1)))
            .collect()
    }

    fn controller() -> SessionController {
        SessionController::new(
            vec!["Trigonometry".to_string(), "Probability".to_string()],
            5,
        )
    }

    fn playing_controller(question_count: usize) -> SessionController {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        assert!(controller.finish_start(ticket.token, Ok(questions(question_count))));
        controller
    }

    #[test]
    fn full_batch_enters_playing() {
        let controller = playing_controller(5);
        assert_eq!(controller.state(), SessionState::Playing);
        assert_eq!(controller.total_questions(), 5);
        assert_eq!(controller.question_number(), 1);
        assert_eq!(controller.score(), 0);
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn short_batch_is_accepted() {
        let controller = playing_controller(3);
        assert_eq!(controller.state(), SessionState::Playing);
        assert_eq!(controller.total_questions(), 3);
    }

    #[test]
    fn generation_failure_returns_to_start_with_error() {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        assert!(controller.finish_start(ticket.token, Err(GenerationError::EmptyResult)));
        assert_eq!(controller.state(), SessionState::Start);
        assert_eq!(controller.total_questions(), 0);
        assert_eq!(
            controller.last_error(),
            Some(GenerationError::EmptyResult.to_string().as_str())
        );
    }

    #[test]
    fn empty_batch_counts_as_failure() {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        assert!(controller.finish_start(ticket.token, Ok(Vec::new())));
        assert_eq!(controller.state(), SessionState::Start);
        assert!(controller.last_error().is_some());
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let mut controller = controller();
        assert_eq!(
            controller.start("Quantum Mechanics"),
            Err(StartRejected::UnknownTopic)
        );
        assert_eq!(controller.start(""), Err(StartRejected::UnknownTopic));
        assert!(!controller.is_loading());
    }

    #[test]
    fn second_start_while_loading_is_rejected() {
        let mut controller = controller();
        controller.start("Trigonometry").unwrap();
        assert_eq!(
            controller.start("Probability"),
            Err(StartRejected::AlreadyLoading)
        );
    }

    #[test]
    fn start_while_playing_is_rejected() {
        let mut controller = playing_controller(5);
        assert_eq!(
            controller.start("Probability"),
            Err(StartRejected::NotAtStart)
        );
    }

    #[test]
    fn stale_result_after_restart_is_discarded() {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        controller.restart();
        assert!(!controller.finish_start(ticket.token, Ok(questions(5))));
        assert_eq!(controller.state(), SessionState::Start);
        assert_eq!(controller.total_questions(), 0);
    }

    #[test]
    fn replayed_token_is_discarded() {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        assert!(controller.finish_start(ticket.token, Ok(questions(5))));
        assert!(!controller.finish_start(ticket.token, Ok(questions(2))));
        assert_eq!(controller.total_questions(), 5);
    }

    #[test]
    fn tokens_are_never_reused() {
        let mut controller = controller();
        let first = controller.start("Trigonometry").unwrap();
        controller.restart();
        let second = controller.start("Probability").unwrap();
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn stale_ticket_does_not_leak_into_a_replacement_controller() {
        // The bot builds a fresh controller for every start, so a ticket
        // issued before a restart must still be rejected by the controller
        // that replaces it.
        let mut orphaned = controller();
        let stale = orphaned.start("Trigonometry").unwrap();
        drop(orphaned);

        let mut controller = controller();
        controller.start("Probability").unwrap();
        assert_ne!(controller.pending_token(), Some(stale.token));
        assert!(!controller.finish_start(stale.token, Ok(questions(5))));
        assert_eq!(controller.state(), SessionState::Start);
        assert_eq!(controller.total_questions(), 0);
        assert!(controller.is_loading());
    }

    #[test]
    fn correct_answer_scores_without_moving() {
        let mut controller = playing_controller(5);
        let answer = controller.current_question().unwrap().answer.clone();
        assert_eq!(controller.answer(&answer), Some(AnswerVerdict::Correct));
        assert_eq!(controller.score(), 1);
        assert_eq!(controller.question_number(), 1);
        assert_eq!(controller.state(), SessionState::Playing);
    }

    #[test]
    fn wrong_answer_reports_the_correct_one() {
        let mut controller = playing_controller(5);
        let answer = controller.current_question().unwrap().answer.clone();
        assert_eq!(
            controller.answer("definitely wrong"),
            Some(AnswerVerdict::Incorrect {
                correct_answer: answer
            })
        );
        assert_eq!(controller.score(), 0);
    }

    #[test]
    fn double_submission_is_a_noop() {
        let mut controller = playing_controller(5);
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        assert_eq!(controller.answer(&answer), None);
        assert_eq!(controller.score(), 1);
        assert_eq!(controller.question_number(), 1);
    }

    #[test]
    fn next_before_answering_is_a_noop() {
        let mut controller = playing_controller(5);
        assert_eq!(controller.next(), None);
        assert_eq!(controller.question_number(), 1);
    }

    #[test]
    fn next_advances_by_exactly_one() {
        let mut controller = playing_controller(5);
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        assert_eq!(controller.next(), Some(Advance::NextQuestion));
        assert_eq!(controller.question_number(), 2);
        assert_eq!(controller.state(), SessionState::Playing);
    }

    #[test]
    fn play_through_keeps_score_of_correct_answers_only() {
        let mut controller = playing_controller(3);

        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        assert_eq!(controller.score(), 1);
        controller.next();
        assert_eq!(controller.question_number(), 2);

        controller.answer("wrong");
        assert_eq!(controller.score(), 1);
        controller.next();

        assert!(controller.is_last_question());
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        assert_eq!(controller.next(), Some(Advance::Finished));
        assert_eq!(controller.state(), SessionState::Finished);
        assert_eq!(controller.score(), 2);
        assert!(controller.score() <= controller.total_questions());
    }

    #[test]
    fn answer_and_next_are_noops_when_finished() {
        let mut controller = playing_controller(1);
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        controller.next();
        assert_eq!(controller.state(), SessionState::Finished);
        assert_eq!(controller.answer(&answer), None);
        assert_eq!(controller.next(), None);
        assert_eq!(controller.score(), 1);
    }

    #[test]
    fn restart_from_finished_yields_a_fresh_session() {
        let mut controller = playing_controller(1);
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        controller.next();

        controller.restart();
        assert_eq!(controller.state(), SessionState::Start);
        assert_eq!(controller.total_questions(), 0);
        assert_eq!(controller.score(), 0);
        assert_eq!(controller.question_number(), 1);
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn restart_mid_quiz_yields_a_fresh_session() {
        let mut controller = playing_controller(5);
        let answer = controller.current_question().unwrap().answer.clone();
        controller.answer(&answer);
        controller.next();
        assert_eq!(controller.question_number(), 2);

        controller.restart();
        assert_eq!(controller.state(), SessionState::Start);
        assert_eq!(controller.total_questions(), 0);
        assert_eq!(controller.score(), 0);
        assert_eq!(controller.question_number(), 1);
        assert!(!controller.is_loading());
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn restart_from_start_clears_the_error() {
        let mut controller = controller();
        let ticket = controller.start("Trigonometry").unwrap();
        controller.finish_start(ticket.token, Err(GenerationError::EmptyResult));
        assert!(controller.last_error().is_some());

        controller.restart();
        assert!(controller.last_error().is_none());
    }
}
