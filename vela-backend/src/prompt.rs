//! Prompter capability interface
//!
//! The resolver and migration engine never talk to a terminal directly;
//! they ask questions through this narrow interface. Tests supply a
//! scripted implementation with predetermined answers.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    /// Input was required but the prompter is disabled
    #[error("interactive input is required but was disabled")]
    Disabled,

    /// A scripted prompter ran out of answers
    #[error("no scripted answer left for prompt {0:?}")]
    Exhausted(String),

    /// Reading or writing the input transport failed
    #[error("prompt I/O failed: {0}")]
    Io(String),
}

/// Asks the user yes/no and free-form questions
pub trait Prompter: Send + Sync {
    /// Ask a yes/no question. Only an explicit "yes" affirms.
    fn ask_yes_no(&self, id: &str, question: &str) -> Result<bool, PromptError>;

    /// Ask a free-form question; an empty answer yields `default`.
    fn ask_string(&self, id: &str, question: &str, default: &str) -> Result<String, PromptError>;
}

/// Prompter that refuses every question
#[derive(Debug, Default)]
pub struct DisabledPrompter;

impl Prompter for DisabledPrompter {
    fn ask_yes_no(&self, _id: &str, _question: &str) -> Result<bool, PromptError> {
        Err(PromptError::Disabled)
    }

    fn ask_string(&self, _id: &str, _question: &str, _default: &str) -> Result<String, PromptError> {
        Err(PromptError::Disabled)
    }
}

/// Prompter answering from a predetermined sequence
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }

    fn next_answer(&self, id: &str) -> Result<String, PromptError> {
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| PromptError::Io("answer queue poisoned".to_string()))?;
        answers
            .pop_front()
            .ok_or_else(|| PromptError::Exhausted(id.to_string()))
    }

    /// Number of unconsumed answers
    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl Prompter for ScriptedPrompter {
    fn ask_yes_no(&self, id: &str, _question: &str) -> Result<bool, PromptError> {
        let answer = self.next_answer(id)?;
        Ok(answer.trim().eq_ignore_ascii_case("yes"))
    }

    fn ask_string(&self, id: &str, _question: &str, default: &str) -> Result<String, PromptError> {
        let answer = self.next_answer(id)?;
        if answer.trim().is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer)
        }
    }
}
