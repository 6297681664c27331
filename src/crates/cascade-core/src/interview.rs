//! Human-gate collaborators.
//!
//! `wait.human` nodes delegate to an injected [`Interviewer`]. The engine
//! ships two implementations: an auto-approver for unattended runs and a
//! scripted recorder for tests. Interactive frontends live outside this
//! crate and implement the trait themselves.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// A question derived from a human-gate node's outgoing edges.
#[derive(Debug, Clone)]
pub struct Question {
    /// Node asking the question.
    pub node_id: String,
    /// Prompt text (node prompt or label).
    pub prompt: String,
    /// Choice labels, one per outgoing edge, in declaration order.
    pub choices: Vec<String>,
    /// Choice taken when the interviewer times out, if declared.
    pub default_choice: Option<String>,
    /// How long to wait for an answer.
    pub timeout: Option<Duration>,
}

/// The interviewer's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// One of the offered choices (matched by label).
    Choice(String),
    /// Free-form text.
    Text(String),
    /// No reply in time.
    Timeout,
    /// The human declined to answer.
    Skipped,
}

/// Answers questions on behalf of a human.
#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: Question) -> Answer;
}

/// Picks the default choice, else the first choice, else approves with
/// empty text. Useful for unattended runs.
pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: Question) -> Answer {
        if let Some(default) = question.default_choice {
            return Answer::Choice(default);
        }
        match question.choices.first() {
            Some(choice) => Answer::Choice(choice.clone()),
            None => Answer::Text(String::new()),
        }
    }
}

/// Scripted interviewer that records every question it is asked.
/// Runs out of script → `Timeout`.
pub struct RecordingInterviewer {
    answers: Mutex<Vec<Answer>>,
    questions: Mutex<Vec<Question>>,
}

impl RecordingInterviewer {
    /// Create with a script of answers, consumed front to back.
    pub fn with_answers(answers: Vec<Answer>) -> Self {
        Self {
            answers: Mutex::new(answers),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    pub fn recorded_questions(&self) -> Vec<Question> {
        self.questions.lock().expect("interviewer lock").clone()
    }
}

#[async_trait]
impl Interviewer for RecordingInterviewer {
    async fn ask(&self, question: Question) -> Answer {
        self.questions
            .lock()
            .expect("interviewer lock")
            .push(question);
        let mut answers = self.answers.lock().expect("interviewer lock");
        if answers.is_empty() {
            Answer::Timeout
        } else {
            answers.remove(0)
        }
    }
}
