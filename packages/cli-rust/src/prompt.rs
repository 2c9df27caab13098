//! Terminal prompts backed by dialoguer

use dialoguer::{Confirm, Input, Password};
use hostkeep_core::{PromptError, Prompter};

/// Asks the operator on the controlling terminal
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn attended(prompt: &str) -> Result<(), PromptError> {
        if console::user_attended_stderr() {
            Ok(())
        } else {
            Err(PromptError::Unavailable(prompt.to_string()))
        }
    }
}

fn cancelled(prompt: &str, e: dialoguer::Error) -> PromptError {
    PromptError::Cancelled(format!("{prompt}: {e}"))
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError> {
        Self::attended(prompt)?;
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| cancelled(prompt, e))
    }

    fn input(&self, prompt: &str, default: &str) -> Result<String, PromptError> {
        Self::attended(prompt)?;
        Input::<String>::new()
            .with_prompt(prompt)
            .default(default.to_string())
            .interact_text()
            .map_err(|e| cancelled(prompt, e))
    }

    fn password(&self, prompt: &str) -> Result<String, PromptError> {
        Self::attended(prompt)?;
        Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| cancelled(prompt, e))
    }
}
