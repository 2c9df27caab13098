//! CLI command implementations
//!
//! `setup` drives whole hosts; `step`, `rollback` and `state` open a single
//! session through [`Session`].

mod config;
mod host;
mod rollback;
mod setup;
mod state;
mod step;

use anyhow::{Result, anyhow};
use hostkeep_core::config::get_lock_dir;
use hostkeep_core::host::HostLock;
use hostkeep_core::{
    Config, HostConfig, HostIdentity, Prompter, Remote, SshConnector, StepContext, Templates,
    Unattended, open_store,
};

use crate::prompt::TerminalPrompter;
use crate::targets::{ask_sudo_password, connector_for, open_session, target_identity};

pub use config::{ConfigArgs, cmd_config};
pub use host::{HostArgs, cmd_host};
pub use rollback::{RollbackArgs, cmd_rollback};
pub use setup::{SetupArgs, cmd_setup};
pub use state::{StateArgs, cmd_state};
pub use step::{StepArgs, cmd_step};

/// Terminal prompts when interactive, otherwise unattended answers
pub(crate) fn prompter_for(config: &Config) -> &'static dyn Prompter {
    if config.interactive {
        &TerminalPrompter
    } else {
        &Unattended
    }
}

/// One locked, connected host ready to build step contexts
pub(crate) struct Session<'h> {
    config: Config,
    host: &'h HostConfig,
    prompter: &'h dyn Prompter,
    templates: Templates,
    connector: SshConnector,
    remote: Box<dyn Remote>,
    _lock: HostLock,
}

impl<'h> Session<'h> {
    /// Lock and connect; `bootstrap` uses the root account on the default port
    pub fn open(
        config: &Config,
        host: &'h HostConfig,
        bootstrap: bool,
        prompter: &'h dyn Prompter,
    ) -> Result<Self> {
        let mut config = config.clone();
        let target = target_identity(host, &config);
        let identity: HostIdentity = if bootstrap {
            target
                .with_user(config.root_user.as_str())
                .with_port(config.default_ssh_port)
        } else {
            ask_sudo_password(&mut config, &target, prompter)?;
            target
        };

        let lock_dir =
            get_lock_dir().ok_or_else(|| anyhow!("Could not determine lock directory"))?;
        let lock = HostLock::acquire(&lock_dir, identity.namespace())?;
        let templates = Templates::for_config(&config)?;
        let connector = connector_for(host, &config);
        let remote = open_session(&connector, &identity, &config)?;
        Ok(Self {
            config,
            host,
            prompter,
            templates,
            connector,
            remote,
            _lock: lock,
        })
    }

    pub fn run<R>(&self, f: impl FnOnce(&mut StepContext<'_>) -> Result<R>) -> Result<R> {
        let mut store = open_store(self.config.state_backend, self.remote.as_ref(), None)?;
        let mut ctx = StepContext::new(
            &self.config,
            self.host,
            self.remote.as_ref(),
            &self.connector,
            store.as_mut(),
            self.prompter,
            &self.templates,
        );
        f(&mut ctx)
    }
}
