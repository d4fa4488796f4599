//! Terminal prompter

use std::io::{BufRead, Write};

use colored::Colorize;

use vela_backend::{PromptError, Prompter};

/// Prompter reading answers from standard input
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_answer(&self, question: &str, hint: &str) -> Result<String, PromptError> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{}\n  {} ", question.bold(), hint.dimmed())
            .and_then(|_| stdout.flush())
            .map_err(|e| PromptError::Io(e.to_string()))?;

        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|e| PromptError::Io(e.to_string()))?;
        Ok(answer.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn ask_yes_no(&self, _id: &str, question: &str) -> Result<bool, PromptError> {
        let answer = self.read_answer(question, "Only \"yes\" will be accepted:")?;
        Ok(answer.eq_ignore_ascii_case("yes"))
    }

    fn ask_string(&self, _id: &str, question: &str, default: &str) -> Result<String, PromptError> {
        let hint = format!("Enter a value (default {default:?}):");
        let answer = self.read_answer(question, &hint)?;
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer)
        }
    }
}
