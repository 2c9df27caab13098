//! One host's provisioning pass
//!
//! A host is first tried at its settled identity. If that login is refused
//! or the port is closed, the host is bootstrapped as the root user on the
//! default port (admin account, root lock, port move) and then reconnected
//! at the settled identity for the remaining steps.

use std::path::Path;

use crate::config::Config;
use crate::hooks::{HookRegistry, HookReport, dispatch_post_install, dispatch_post_setup};
use crate::host::{HostConfig, HostError, HostIdentity, require_supported};
use crate::prompt::Prompter;
use crate::remote::{Connector, Remote};
use crate::state::open_store;
use crate::steps::{
    EtcUpload, Firewall, Packages, Repositories, RootDisablement, SshHardening, SshKey, SshPort,
    Step, StepContext, StepOutcome, Timezone, ToleratedFailure, Upgrade,
};
use crate::templates::Templates;

/// One entry of a pass, in execution order
enum Action {
    Step(&'static dyn Step),
    PostInstallHooks,
    PostSetupHooks,
}

const BOOTSTRAP: &[Action] = &[Action::Step(&RootDisablement), Action::Step(&SshPort)];

const SETTLED: &[Action] = &[
    Action::Step(&SshKey),
    Action::Step(&SshHardening),
    Action::Step(&Repositories),
    Action::Step(&Upgrade),
    Action::Step(&Packages),
    Action::Step(&EtcUpload),
    Action::PostInstallHooks,
    Action::Step(&Firewall),
    Action::Step(&Timezone),
    Action::PostSetupHooks,
];

/// Result of one step
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: &'static str,
    pub result: Result<StepOutcome, String>,
}

/// Everything that happened on one host
#[derive(Debug, Default)]
pub struct NodeReport {
    pub host: String,
    pub steps: Vec<StepRecord>,
    pub tolerated: Vec<ToleratedFailure>,
    pub installed: Vec<String>,
    pub hooks: HookReport,
    /// Why the pass stopped early, if it did
    pub aborted: Option<String>,
}

impl NodeReport {
    fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.steps.iter().all(|s| s.result.is_ok())
    }

    pub fn applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.result, Ok(StepOutcome::Applied)))
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.result.is_err())
    }

    pub fn outcome(&self, step: &str) -> Option<&Result<StepOutcome, String>> {
        self.steps.iter().find(|s| s.name == step).map(|s| &s.result)
    }
}

/// Inputs for provisioning one host
pub struct NodeSetup<'a> {
    pub config: &'a Config,
    pub host: &'a HostConfig,
    pub connector: &'a dyn Connector,
    pub prompter: &'a dyn Prompter,
    pub templates: &'a Templates,
    pub hooks: &'a HookRegistry,
    /// Overrides the local state backend's directory
    pub state_dir: Option<&'a Path>,
}

impl NodeSetup<'_> {
    /// Identity the host is managed as once settled
    pub fn target(&self) -> HostIdentity {
        let identity = self.host.identity(self.config.ssh_port);
        match &self.config.host_user {
            Some(user) => identity.with_user(user.as_str()),
            None => identity,
        }
    }

    /// Identity of a freshly provisioned host
    pub fn bootstrap_identity(&self) -> HostIdentity {
        self.target()
            .with_user(self.config.root_user.as_str())
            .with_port(self.config.default_ssh_port)
    }

    fn open(&self, identity: &HostIdentity) -> Result<Box<dyn Remote>, HostError> {
        let password = if identity.user == self.config.root_user {
            None
        } else {
            self.config.host_password.as_deref()
        };
        let session = self.connector.connect(identity, password)?;
        require_supported(session.as_ref())?;
        Ok(session)
    }

    /// Run every step against the host; never panics on host failures
    pub fn run(&self) -> NodeReport {
        let target = self.target();
        let mut report = NodeReport::new(target.to_string());
        if let Err(reason) = self.run_inner(&target, &mut report) {
            tracing::error!("[{}] aborted: {}", target, reason);
            report.aborted = Some(reason);
        }
        report
    }

    fn run_inner(&self, target: &HostIdentity, report: &mut NodeReport) -> Result<(), String> {
        let session = match self.open(target) {
            Ok(session) => session,
            Err(e) if e.is_transport() => {
                let bootstrap = self.bootstrap_identity();
                tracing::info!("[{}] not reachable ({}); bootstrapping as {}", target, e, bootstrap);
                let first = self.open(&bootstrap).map_err(|e| e.to_string())?;
                self.run_pass(first.as_ref(), BOOTSTRAP, report)?;
                drop(first);
                self.open(target).map_err(|e| e.to_string())?
            }
            Err(e) => return Err(e.to_string()),
        };
        self.run_pass(session.as_ref(), SETTLED, report)
    }

    /// Run `actions` over one session; an `Err` stops the host
    fn run_pass(
        &self,
        remote: &dyn Remote,
        actions: &[Action],
        report: &mut NodeReport,
    ) -> Result<(), String> {
        let mut store = open_store(self.config.state_backend, remote, self.state_dir)
            .map_err(|e| e.to_string())?;
        let mut ctx = StepContext::new(
            self.config,
            self.host,
            remote,
            self.connector,
            store.as_mut(),
            self.prompter,
            self.templates,
        );

        let mut result = Ok(());
        for action in actions {
            match action {
                Action::Step(step) => {
                    if let Err(reason) = run_step(*step, &mut ctx, report) {
                        result = Err(reason);
                        break;
                    }
                }
                Action::PostInstallHooks => {
                    report
                        .hooks
                        .merge(dispatch_post_install(self.hooks, &ctx.installed, remote));
                }
                Action::PostSetupHooks => {
                    report.hooks.merge(dispatch_post_setup(self.hooks, remote));
                }
            }
        }

        report.tolerated.append(&mut ctx.tolerated);
        report.installed.append(&mut ctx.installed);
        result
    }
}

fn run_step(
    step: &dyn Step,
    ctx: &mut StepContext<'_>,
    report: &mut NodeReport,
) -> Result<(), String> {
    let name = step.name();
    tracing::debug!("[{}] {}", ctx.id(), name);
    match step.apply(ctx) {
        Ok(outcome) => {
            match &outcome {
                StepOutcome::Applied => tracing::info!("[{}] {}: applied", ctx.id(), name),
                StepOutcome::NoChange => tracing::debug!("[{}] {}: no change", ctx.id(), name),
                other => tracing::warn!("[{}] {}: {}", ctx.id(), name, other),
            }
            report.steps.push(StepRecord {
                name,
                result: Ok(outcome),
            });
            Ok(())
        }
        Err(e) => {
            let reason = e.to_string();
            report.steps.push(StepRecord {
                name,
                result: Err(reason.clone()),
            });
            if step.fail_closed() || e.is_transport() {
                return Err(format!("{name}: {reason}"));
            }
            tracing::warn!("[{}] {} failed, continuing: {}", ctx.id(), name, reason);
            Ok(())
        }
    }
}
