//! Output utilities for CLI commands
//!
//! Per-host progress lines and consistent styling of step outcomes.

pub mod colors;
pub mod progress;

pub use colors::outcome_style;
pub use progress::{HostLine, HostProgress};
