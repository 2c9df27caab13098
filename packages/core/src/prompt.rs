//! Operator prompts
//!
//! Steps ask for confirmations and passwords through [`Prompter`]. The CLI
//! supplies a terminal implementation; [`Unattended`] answers for batch runs.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// The operator interrupted the prompt
    #[error("Prompt cancelled: {0}")]
    Cancelled(String),

    /// No terminal to ask on
    #[error("'{0}' needs an answer but no terminal is available")]
    Unavailable(String),
}

pub trait Prompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError>;

    /// Free-text input; an empty answer yields `default`
    fn input(&self, prompt: &str, default: &str) -> Result<String, PromptError>;

    /// Hidden input, asked once
    fn password(&self, prompt: &str) -> Result<String, PromptError>;
}

/// Prompter for runs without a terminal
///
/// Never approves anything on the operator's behalf and cannot supply
/// passwords; free-text questions take their default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Prompter for Unattended {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool, PromptError> {
        tracing::debug!("Unattended, declining: {}", prompt);
        Ok(false)
    }

    fn input(&self, _prompt: &str, default: &str) -> Result<String, PromptError> {
        Ok(default.to_string())
    }

    fn password(&self, prompt: &str) -> Result<String, PromptError> {
        Err(PromptError::Unavailable(prompt.to_string()))
    }
}
