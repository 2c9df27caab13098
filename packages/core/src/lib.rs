//! hostkeep-core - Core library for hostkeep
//!
//! This library provides host reconciliation over SSH: the remote command
//! contracts, the per-host state store, the provisioning steps, and the
//! hook registry that the CLI drives.

pub mod backup;
pub mod config;
pub mod deploy;
pub mod hooks;
pub mod host;
pub mod node;
pub mod prompt;
pub mod remote;
pub mod state;
pub mod steps;
pub mod templates;
pub mod version;

#[cfg(test)]
mod fake;

// Re-export version functions for Rust consumers
pub use version::{get_version, get_version_long};

pub use config::{Config, HookConfig, StateBackend, load_config, load_config_from, save_config};
pub use hooks::{CommandHook, HookPoint, HookRegistry, HookReport};
pub use host::{
    HostConfig, HostError, HostIdentity, HostsFile, SshConnector, load_hosts, save_hosts,
};
pub use node::{NodeReport, NodeSetup, StepRecord};
pub use prompt::{PromptError, Prompter, Unattended};
pub use remote::{Connector, Remote};
pub use state::{StateError, StateStore, StateValue, open_store};
pub use steps::{RollbackTarget, Step, StepContext, StepError, StepKind, StepOutcome};
pub use templates::{TemplateError, Templates};
