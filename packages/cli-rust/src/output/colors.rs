//! Color utilities for CLI output

use console::{Style, StyledObject};
use hostkeep_core::StepOutcome;

/// Style a step outcome
///
/// - applied -> green bold
/// - no change -> dim
/// - declined -> yellow
/// - precondition failed -> red
pub fn outcome_style(outcome: &StepOutcome) -> StyledObject<String> {
    let style = match outcome {
        StepOutcome::Applied => Style::new().green().bold(),
        StepOutcome::NoChange => Style::new().dim(),
        StepOutcome::Declined { .. } => Style::new().yellow(),
        StepOutcome::PreconditionFailed { .. } => Style::new().red(),
    };
    style.apply_to(outcome.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // StyledObject::to_string() includes ANSI escape codes when colors are enabled,
    // so tests check the text with contains().

    #[test]
    fn outcome_style_applied() {
        assert!(outcome_style(&StepOutcome::Applied).to_string().contains("applied"));
    }

    #[test]
    fn outcome_style_keeps_reason() {
        let styled = outcome_style(&StepOutcome::declined("firewall not enabled"));
        assert!(styled.to_string().contains("firewall not enabled"));
    }

    #[test]
    fn outcome_style_precondition() {
        let styled = outcome_style(&StepOutcome::precondition("no authorized_keys"));
        assert!(styled.to_string().contains("no authorized_keys"));
    }
}
