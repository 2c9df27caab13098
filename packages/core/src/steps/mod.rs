//! Idempotent reconciliation steps
//!
//! Every step compares the desired configuration with the host's recorded
//! state, asks before anything destructive, backs up a file before its first
//! edit, issues the smallest set of commands that closes the gap and only
//! then records completion. Running a step twice makes no changes the
//! second time.

mod etc;
mod firewall;
mod packages;
mod repositories;
mod root;
pub mod ssh;
pub mod ssh_key;
mod ssh_port;
pub mod timezone;
mod upgrade;

use std::fmt;

use thiserror::Error;

use crate::config::Config;
use crate::host::{HostConfig, HostError};
use crate::prompt::{PromptError, Prompter};
use crate::remote::{CommandOutput, Connector, Remote};
use crate::state::{StateError, StateStore};
use crate::templates::Templates;

pub use etc::EtcUpload;
pub use firewall::Firewall;
pub use packages::{PACKAGE_LOG, Packages, parse_installed};
pub use repositories::Repositories;
pub use root::RootDisablement;
pub use ssh::SshHardening;
pub use ssh_key::SshKey;
pub use ssh_port::SshPort;
pub use timezone::Timezone;
pub use upgrade::Upgrade;

pub const SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";

/// How a step ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The host was changed and the change recorded
    Applied,
    /// Desired and recorded state already agree
    NoChange,
    /// The operator (or configuration) said no; nothing recorded
    Declined { reason: String },
    /// The host is not in a state the step can safely act on
    PreconditionFailed { reason: String },
}

impl StepOutcome {
    pub fn declined(reason: impl Into<String>) -> Self {
        StepOutcome::Declined {
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        StepOutcome::PreconditionFailed {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Applied => "applied",
            StepOutcome::NoChange => "unchanged",
            StepOutcome::Declined { .. } => "declined",
            StepOutcome::PreconditionFailed { .. } => "precondition failed",
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Declined { reason } | StepOutcome::PreconditionFailed { reason } => {
                write!(f, "{}: {}", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Errors that stop a step; every message names the host
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{host}: template {template}: {reason}")]
    Template {
        host: String,
        template: String,
        reason: String,
    },

    /// A staged edit was rejected; the live file was left alone
    #[error("{host}: {path} failed validation: {reason}")]
    Validation {
        host: String,
        path: String,
        reason: String,
    },

    #[error("{host}: {source}")]
    Prompt {
        host: String,
        #[source]
        source: PromptError,
    },

    #[error("{host}: passwords did not match after {attempts} attempts")]
    PasswordRetriesExhausted { host: String, attempts: u32 },

    #[error("{host}: key file {path} does not exist")]
    KeyFileMissing { host: String, path: String },

    #[error("{host}: refusing to lock '{user}' from a session logged in as '{user}'")]
    LockoutRefused { host: String, user: String },

    #[error("{host}: {reason}")]
    Unsupported { host: String, reason: String },

    #[error("{host}: {path}: {source}")]
    LocalIo {
        host: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    /// The host stopped answering; nothing else can run on it this pass
    pub fn is_transport(&self) -> bool {
        match self {
            StepError::Host(e) | StepError::State(StateError::Transport(e)) => e.is_transport(),
            _ => false,
        }
    }
}

/// A warn-only command that exited non-zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToleratedFailure {
    pub host: String,
    pub command: String,
    pub status: i32,
    pub stderr: String,
}

/// Everything a step reads and writes during one host pass
pub struct StepContext<'a> {
    pub config: &'a Config,
    pub host: &'a HostConfig,
    pub remote: &'a dyn Remote,
    pub connector: &'a dyn Connector,
    pub state: &'a mut dyn StateStore,
    pub prompter: &'a dyn Prompter,
    pub templates: &'a Templates,
    pub tolerated: Vec<ToleratedFailure>,
    /// Packages installed during this pass, in install order
    pub installed: Vec<String>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        config: &'a Config,
        host: &'a HostConfig,
        remote: &'a dyn Remote,
        connector: &'a dyn Connector,
        state: &'a mut dyn StateStore,
        prompter: &'a dyn Prompter,
        templates: &'a Templates,
    ) -> Self {
        Self {
            config,
            host,
            remote,
            connector,
            state,
            prompter,
            templates,
            tolerated: Vec::new(),
            installed: Vec::new(),
        }
    }

    /// `user@host:port` of the connected session
    pub fn id(&self) -> String {
        self.remote.identity().to_string()
    }

    /// Run a privileged command whose failure is only worth a warning
    pub fn sudo_tolerant(&mut self, line: &str) -> Result<CommandOutput, StepError> {
        let output = self.remote.sudo_warn(line)?;
        if !output.success() {
            tracing::warn!(
                "[{}] `{}` exited with status {}: {}",
                self.id(),
                line,
                output.status,
                output.stderr.trim()
            );
            self.tolerated.push(ToleratedFailure {
                host: self.id(),
                command: line.to_string(),
                status: output.status,
                stderr: output.stderr.clone(),
            });
        }
        Ok(output)
    }

    /// Safety gate: a config flag approves outright, otherwise ask when interactive
    pub fn gate(&self, approved: bool, prompt: &str, default: bool) -> Result<bool, StepError> {
        if approved {
            return Ok(true);
        }
        if !self.config.interactive {
            return Ok(false);
        }
        self.prompter
            .confirm(prompt, default)
            .map_err(|source| self.prompt_error(source))
    }

    pub fn prompt_error(&self, source: PromptError) -> StepError {
        StepError::Prompt {
            host: self.id(),
            source,
        }
    }

    /// Ask for a new password twice until both entries agree
    ///
    /// Gives up after `max_password_attempts` mismatched or empty pairs.
    pub fn new_password(&self, user: &str) -> Result<String, StepError> {
        let attempts = self.config.max_password_attempts;
        for attempt in 1..=attempts {
            let first = self
                .prompter
                .password(&format!("New password for {user}"))
                .map_err(|e| self.prompt_error(e))?;
            let second = self
                .prompter
                .password(&format!("Repeat password for {user}"))
                .map_err(|e| self.prompt_error(e))?;
            if !first.is_empty() && first == second {
                return Ok(first);
            }
            tracing::warn!(
                "[{}] passwords for {} did not match ({}/{})",
                self.id(),
                user,
                attempt,
                attempts
            );
        }
        Err(StepError::PasswordRetriesExhausted {
            host: self.id(),
            attempts,
        })
    }
}

/// Home directory of a remote account
pub fn home_dir(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{user}")
    }
}

pub fn restart_ssh(remote: &dyn Remote) -> Result<(), StepError> {
    remote.sudo("systemctl restart ssh")?;
    tracing::info!("[{}] restarted sshd", remote.identity());
    Ok(())
}

pub trait Step {
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError>;

    /// Whether an error from this step must abort the host's pass
    fn fail_closed(&self) -> bool {
        false
    }
}

/// Steps runnable on their own from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StepKind {
    Repositories,
    Upgrade,
    Packages,
    Root,
    SshPort,
    SshKey,
    Ssh,
    Firewall,
    Timezone,
    Etc,
}

impl StepKind {
    pub fn step(self) -> Box<dyn Step> {
        match self {
            StepKind::Repositories => Box::new(Repositories),
            StepKind::Upgrade => Box::new(Upgrade),
            StepKind::Packages => Box::new(Packages),
            StepKind::Root => Box::new(RootDisablement),
            StepKind::SshPort => Box::new(SshPort),
            StepKind::SshKey => Box::new(SshKey),
            StepKind::Ssh => Box::new(SshHardening),
            StepKind::Firewall => Box::new(Firewall),
            StepKind::Timezone => Box::new(Timezone),
            StepKind::Etc => Box::new(EtcUpload),
        }
    }

    /// Root and port steps need the bootstrap account on the default port
    pub fn is_bootstrap(self) -> bool {
        matches!(self, StepKind::Root | StepKind::SshPort)
    }
}

/// Steps that can be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RollbackTarget {
    Ssh,
    SshKey,
    Timezone,
}

impl RollbackTarget {
    pub fn rollback(self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        match self {
            RollbackTarget::Ssh => ssh::rollback(ctx),
            RollbackTarget::SshKey => ssh_key::rollback(ctx),
            RollbackTarget::Timezone => timezone::rollback(ctx),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::fake::FakeHost;
    use crate::prompt::Unattended;
    use crate::state::{RemoteStateStore, StateValue};

    /// A fake host plus everything a step context borrows
    pub(crate) struct Rig {
        pub host: FakeHost,
        pub config: Config,
        pub inventory: HostConfig,
        pub templates: Templates,
    }

    impl Rig {
        pub fn new(user: &str) -> Self {
            let config = Config {
                interactive: false,
                ..Config::default()
            };
            Self {
                host: FakeHost::new(user),
                config,
                inventory: HostConfig::new("web1.example.com").with_user(user),
                templates: Templates::embedded().unwrap(),
            }
        }

        /// Run `f` with a context on the rig's own session
        pub fn run<R>(
            &self,
            prompter: &dyn Prompter,
            f: impl FnOnce(&mut StepContext<'_>) -> R,
        ) -> R {
            self.run_on(&self.host, prompter, f)
        }

        pub fn run_on<R>(
            &self,
            session: &FakeHost,
            prompter: &dyn Prompter,
            f: impl FnOnce(&mut StepContext<'_>) -> R,
        ) -> R {
            let mut state = RemoteStateStore::new(session);
            let connector = session.connector();
            let mut ctx = StepContext::new(
                &self.config,
                &self.inventory,
                session,
                &connector,
                &mut state,
                prompter,
                &self.templates,
            );
            f(&mut ctx)
        }

        pub fn apply(&self, step: &dyn Step) -> Result<StepOutcome, StepError> {
            self.run(&Unattended, |ctx| step.apply(ctx))
        }

        pub fn state(&self, key: &str) -> Option<StateValue> {
            RemoteStateStore::new(&self.host).get(key).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Rig;
    use super::*;
    use crate::fake::ScriptedPrompter;
    use crate::prompt::Unattended;

    #[test]
    fn test_outcome_display() {
        assert_eq!(StepOutcome::Applied.to_string(), "applied");
        assert_eq!(
            StepOutcome::declined("firewall disabled").to_string(),
            "declined: firewall disabled"
        );
    }

    #[test]
    fn test_gate_flag_skips_prompt() {
        let rig = Rig::new("root");
        let prompter = ScriptedPrompter::new();
        assert!(rig.run(&prompter, |ctx| ctx.gate(true, "Lock root?", true)).unwrap());
        assert!(prompter.asked.borrow().is_empty());
    }

    #[test]
    fn test_gate_unattended_declines() {
        let rig = Rig::new("root");
        assert!(!rig.run(&Unattended, |ctx| ctx.gate(false, "Lock root?", true)).unwrap());
    }

    #[test]
    fn test_gate_asks_when_interactive() {
        let mut rig = Rig::new("root");
        rig.config.interactive = true;
        let prompter = ScriptedPrompter::new().confirm_with(true);
        assert!(rig.run(&prompter, |ctx| ctx.gate(false, "Enable firewall?", true)).unwrap());
        assert_eq!(prompter.asked.borrow().as_slice(), ["Enable firewall?"]);
    }

    #[test]
    fn test_new_password_bounded_retry() {
        let mut rig = Rig::new("root");
        rig.config.interactive = true;
        let prompter = ScriptedPrompter::new()
            .password_with("a")
            .password_with("b")
            .password_with("c")
            .password_with("d")
            .password_with("e")
            .password_with("f");
        let err = rig.run(&prompter, |ctx| ctx.new_password("deploy")).unwrap_err();
        assert!(matches!(
            err,
            StepError::PasswordRetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(prompter.asked.borrow().len(), 6);
    }

    #[test]
    fn test_new_password_accepts_matching_pair() {
        let rig = Rig::new("root");
        let prompter = ScriptedPrompter::new()
            .password_with("one")
            .password_with("two")
            .password_with("s3cret")
            .password_with("s3cret");
        let password = rig.run(&prompter, |ctx| ctx.new_password("deploy")).unwrap();
        assert_eq!(password, "s3cret");
    }

    #[test]
    fn test_sudo_tolerant_records_failure() {
        let rig = Rig::new("root");
        rig.host.fail("ufw allow", 1, "Skipping adding existing rule");
        let tolerated = rig.run(&Unattended, |ctx| {
            ctx.sudo_tolerant("ufw allow 80/tcp").unwrap();
            ctx.tolerated.clone()
        });
        assert_eq!(tolerated.len(), 1);
        assert_eq!(tolerated[0].command, "ufw allow 80/tcp");
        assert_eq!(tolerated[0].host, "root@web1.example.com:22");
    }

    #[test]
    fn test_home_dir() {
        assert_eq!(home_dir("root"), "/root");
        assert_eq!(home_dir("deploy"), "/home/deploy");
    }
}
