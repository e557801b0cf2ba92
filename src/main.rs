mod config;
mod quiz;

use std::sync::Arc;

use dotenv::dotenv;
use teloxide::{
    dispatching::dialogue::InMemStorage,
    prelude::*,
    types::{ChatId, KeyboardButton, KeyboardMarkup, KeyboardRemove},
};

use config::Config;
use quiz::generator::QuizGenerator;
use quiz::session::{Advance, AnswerVerdict, SessionController, SessionState};

type QuizDialogue = Dialogue<State, InMemStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveTopic,
    Generating {
        controller: SessionController,
    },
    InQuiz {
        controller: SessionController,
    },
}

#[tokio::main]
async fn main() {
    // A .env file is optional; real environment variables win either way.
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting the Math Whiz quiz bot...");

    let config = Arc::new(Config::from_env());
    let generator = Arc::new(QuizGenerator::new(config.api_key.clone()));

    let bot = Bot::from_env();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, InMemStorage<State>, State>()
            .branch(
                dptree::filter(|msg: Message| msg.text() == Some(RESTART_COMMAND))
                    .endpoint(restart),
            )
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveTopic].endpoint(receive_topic))
            .branch(dptree::case![State::Generating { controller }].endpoint(generating))
            .branch(dptree::case![State::InQuiz { controller }].endpoint(in_quiz)),
    )
    .dependencies(dptree::deps![InMemStorage::<State>::new(), config, generator])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const RESTART_COMMAND: &str = "/restart";
const PLAY_AGAIN: &str = "Play Again";
const NEXT_QUESTION: &str = "Next Question";
const FINISH_QUIZ: &str = "Finish";

const GREETING_TEXT: &str =
    "Welcome to the Math Whiz Challenge! 🧠 Pick a topic and test your Class 11th math skills.";

async fn start(config: Arc<Config>, bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(topic_keyboard(&config))
        .await?;

    dialogue.update(State::ReceiveTopic).await?;
    Ok(())
}

async fn receive_topic(
    config: Arc<Config>,
    generator: Arc<QuizGenerator>,
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
) -> HandlerResult {
    let topic = match msg.text() {
        Some(topic) => topic,
        None => {
            bot.send_message(msg.chat.id, "Please pick a topic with the buttons below.")
                .reply_markup(topic_keyboard(&config))
                .await?;
            return Ok(());
        }
    };

    let mut controller = SessionController::new(config.topics.clone(), config.questions_per_quiz);
    let ticket = match controller.start(topic) {
        Ok(ticket) => ticket,
        Err(rejection) => {
            log::debug!("Start intent rejected: {rejection:?}");
            bot.send_message(
                msg.chat.id,
                "That topic isn't on the list. Please pick one of the buttons below.",
            )
            .reply_markup(topic_keyboard(&config))
            .await?;
            return Ok(());
        }
    };

    dialogue.update(State::Generating { controller }).await?;
    bot.send_message(
        msg.chat.id,
        format!("Generating your {} challenge... ⏳", ticket.topic),
    )
    .reply_markup(KeyboardRemove::new())
    .await?;

    let result = generator.fetch_questions(&ticket.topic, ticket.count).await;

    // The user may have restarted while we were waiting, in which case this
    // result belongs to a session that no longer exists.
    let mut controller = match dialogue.get().await? {
        Some(State::Generating { controller })
            if controller.pending_token() == Some(ticket.token) =>
        {
            controller
        }
        _ => {
            log::debug!("Discarding generation result for a stale request");
            return Ok(());
        }
    };
    if !controller.finish_start(ticket.token, result) {
        return Ok(());
    }

    match controller.state() {
        SessionState::Playing => {
            log::info!(
                "Quiz on {:?} started with {} questions",
                ticket.topic,
                controller.total_questions()
            );
            send_question(&bot, msg.chat.id, &controller).await?;
            dialogue.update(State::InQuiz { controller }).await?;
        }
        _ => {
            let message = controller
                .last_error()
                .unwrap_or("Something went wrong. Please try again.")
                .to_owned();
            bot.send_message(msg.chat.id, format!("Error: {message}"))
                .reply_markup(topic_keyboard(&config))
                .await?;
            dialogue.update(State::ReceiveTopic).await?;
        }
    }
    Ok(())
}

async fn generating(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        format!("Hold on, your questions are still being generated. Send {RESTART_COMMAND} to cancel."),
    )
    .await?;
    Ok(())
}

async fn in_quiz(
    config: Arc<Config>,
    bot: Bot,
    dialogue: QuizDialogue,
    mut controller: SessionController,
    msg: Message,
) -> HandlerResult {
    let text = match msg.text() {
        Some(text) => text,
        None => {
            bot.send_message(msg.chat.id, "Please use the buttons to answer.")
                .await?;
            return Ok(());
        }
    };

    // Answer options win over the control labels, so a generated option
    // that happens to read "Next Question" stays selectable as an answer.
    if treat_as_answer(&controller, text) {
        match controller.answer(text) {
            Some(AnswerVerdict::Correct) => {
                bot.send_message(msg.chat.id, "✅ Correct!")
                    .reply_markup(next_keyboard(&controller))
                    .await?;
            }
            Some(AnswerVerdict::Incorrect { correct_answer }) => {
                bot.send_message(
                    msg.chat.id,
                    format!("❌ Not quite! The correct answer is {correct_answer}."),
                )
                .reply_markup(next_keyboard(&controller))
                .await?;
            }
            None => {}
        }
        dialogue.update(State::InQuiz { controller }).await?;
        return Ok(());
    }

    match text {
        NEXT_QUESTION | FINISH_QUIZ => match controller.next() {
            Some(Advance::NextQuestion) => {
                send_question(&bot, msg.chat.id, &controller).await?;
                dialogue.update(State::InQuiz { controller }).await?;
            }
            Some(Advance::Finished) => {
                send_end_screen(&bot, msg.chat.id, &controller).await?;
                dialogue.update(State::InQuiz { controller }).await?;
            }
            None => {
                if controller.state() == SessionState::Finished {
                    bot.send_message(
                        msg.chat.id,
                        format!("The quiz is over! Send \"{PLAY_AGAIN}\" to go again."),
                    )
                    .await?;
                } else {
                    bot.send_message(msg.chat.id, "Answer the question first!")
                        .await?;
                }
            }
        },
        PLAY_AGAIN => {
            controller.restart();
            bot.send_message(msg.chat.id, "Pick your next topic!")
                .reply_markup(topic_keyboard(&config))
                .await?;
            dialogue.update(State::ReceiveTopic).await?;
        }
        choice => {
            if controller.state() == SessionState::Finished {
                bot.send_message(
                    msg.chat.id,
                    format!("The quiz is over! Send \"{PLAY_AGAIN}\" to go again."),
                )
                .await?;
                return Ok(());
            }

            let is_option = controller
                .current_question()
                .map(|question| question.options.iter().any(|option| option == choice))
                .unwrap_or(false);
            if is_option {
                // Only reachable once the question has been answered.
                bot.send_message(
                    msg.chat.id,
                    format!("You've already answered this one. Hit \"{NEXT_QUESTION}\"!"),
                )
                .await?;
            } else {
                bot.send_message(msg.chat.id, "Please pick one of the four options.")
                    .await?;
            }
        }
    }
    Ok(())
}

/// A reply counts as an answer only while the current question is still
/// open; afterwards the same text falls through to the control labels.
fn treat_as_answer(controller: &SessionController, text: &str) -> bool {
    !controller.is_answered()
        && controller
            .current_question()
            .map(|question| question.options.iter().any(|option| option == text))
            .unwrap_or(false)
}

async fn restart(config: Arc<Config>, bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    // Leaving the Generating state here is what orphans an in-flight
    // generation call; its result no longer matches the dialogue and is
    // dropped when it arrives.
    dialogue.update(State::ReceiveTopic).await?;
    bot.send_message(msg.chat.id, "Starting over. Pick a topic!")
        .reply_markup(topic_keyboard(&config))
        .await?;
    Ok(())
}

fn topic_keyboard(config: &Config) -> KeyboardMarkup {
    let rows = config
        .topics
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|topic| KeyboardButton::new(topic.clone()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    KeyboardMarkup::new(rows)
}

fn next_keyboard(controller: &SessionController) -> KeyboardMarkup {
    let label = if controller.is_last_question() {
        FINISH_QUIZ
    } else {
        NEXT_QUESTION
    };
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(label)]])
}

async fn send_question(bot: &Bot, chat_id: ChatId, controller: &SessionController) -> HandlerResult {
    let question = match controller.current_question() {
        Some(question) => question,
        None => return Ok(()),
    };

    let text = format!(
        "Question {}/{} | Score: {}\n\n{}",
        controller.question_number(),
        controller.total_questions(),
        controller.score(),
        question.question
    );
    let rows = question
        .options
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|option| KeyboardButton::new(option.clone()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    bot.send_message(chat_id, text)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn send_end_screen(
    bot: &Bot,
    chat_id: ChatId,
    controller: &SessionController,
) -> HandlerResult {
    let score = controller.score();
    let total = controller.total_questions();
    let text = format!(
        "Challenge complete!\n{}\n\nYour final score: {score} / {total}",
        feedback_message(score, total)
    );

    bot.send_message(chat_id, text)
        .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(
            PLAY_AGAIN,
        )]]))
        .await?;
    Ok(())
}

fn feedback_message(score: usize, total: usize) -> &'static str {
    if total == 0 {
        return "Keep trying! Every attempt is a step forward. 🧠";
    }
    let percentage = (score as f64 / total as f64 * 100.0).round() as u32;
    match percentage {
        100 => "Perfect score! You're a math genius! 🚀",
        80..=99 => "Excellent work! You really know your stuff. ✨",
        60..=79 => "Great job! A little more practice and you'll be unstoppable. 👍",
        40..=59 => "Good effort! Keep practicing. 💪",
        _ => "Keep trying! Every attempt is a step forward. 🧠",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::Question;

    fn controller_with_options(options: [&str; 4], answer: &str) -> SessionController {
        let mut controller = SessionController::new(vec!["Trigonometry".to_string()], 1);
        let ticket = controller.start("Trigonometry").unwrap();
        let question = Question {
            question: "Pick the right label".to_string(),
            options: options.iter().map(|option| option.to_string()).collect(),
            answer: answer.to_string(),
        };
        assert!(controller.finish_start(ticket.token, Ok(vec![question])));
        controller
    }

    #[test]
    fn option_named_like_a_control_label_is_an_answer_first() {
        let mut controller =
            controller_with_options(["Next Question", "10", "20", "30"], "Next Question");
        assert!(treat_as_answer(&controller, NEXT_QUESTION));

        assert_eq!(
            controller.answer(NEXT_QUESTION),
            Some(AnswerVerdict::Correct)
        );
        // Once answered, the same text acts as the Next button again.
        assert!(!treat_as_answer(&controller, NEXT_QUESTION));
        assert_eq!(controller.next(), Some(Advance::Finished));
    }

    #[test]
    fn replies_that_are_not_options_are_never_answers() {
        let controller = controller_with_options(["10", "20", "30", "40"], "10");
        assert!(!treat_as_answer(&controller, "50"));
        assert!(!treat_as_answer(&controller, NEXT_QUESTION));
    }
}
