//! Post-install and post-setup hooks
//!
//! Components register handlers with a [`HookRegistry`] in the order they
//! should run; the primary project goes first. A handler that could not be
//! loaded stays in the registry as a load failure so dispatch can report it
//! instead of silently skipping it. Hook problems are logged and reported,
//! never fatal to a host pass.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::config::HookConfig;
use crate::remote::{Remote, RemoteCommand};

/// Code run against a host after an install or at the end of setup
pub trait HookHandler {
    fn run(&self, remote: &dyn Remote) -> Result<()>;
}

impl<F> HookHandler for F
where
    F: Fn(&dyn Remote) -> Result<()>,
{
    fn run(&self, remote: &dyn Remote) -> Result<()> {
        self(remote)
    }
}

/// Where in the host pass a hook fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint<'p> {
    /// After the named package was installed by this pass
    PostInstall(&'p str),
    PostSetup,
}

impl fmt::Display for HookPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::PostInstall(package) => write!(f, "post_install[{package}]"),
            HookPoint::PostSetup => f.write_str("post_setup"),
        }
    }
}

/// Result of looking a hook up
pub enum HookLookup<'r> {
    NotRegistered,
    Ready(&'r dyn HookHandler),
    LoadFailed(&'r str),
}

enum Entry {
    Ready(Box<dyn HookHandler>),
    LoadFailed(String),
}

impl Entry {
    fn lookup(&self) -> HookLookup<'_> {
        match self {
            Entry::Ready(handler) => HookLookup::Ready(handler.as_ref()),
            Entry::LoadFailed(reason) => HookLookup::LoadFailed(reason),
        }
    }
}

struct Component {
    name: String,
    post_install: BTreeMap<String, Entry>,
    post_setup: Option<Entry>,
}

#[derive(Default)]
pub struct HookRegistry {
    components: Vec<Component>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn component_mut(&mut self, name: &str) -> &mut Component {
        let index = match self.components.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                self.components.push(Component {
                    name: name.to_string(),
                    post_install: BTreeMap::new(),
                    post_setup: None,
                });
                self.components.len() - 1
            }
        };
        &mut self.components[index]
    }

    fn insert(&mut self, component: &str, point: HookPoint<'_>, entry: Entry) {
        let component = self.component_mut(component);
        match point {
            HookPoint::PostInstall(package) => {
                component.post_install.insert(package.to_string(), entry);
            }
            HookPoint::PostSetup => component.post_setup = Some(entry),
        }
    }

    pub fn register_post_install(
        &mut self,
        component: &str,
        package: &str,
        handler: impl HookHandler + 'static,
    ) {
        self.insert(
            component,
            HookPoint::PostInstall(package),
            Entry::Ready(Box::new(handler)),
        );
    }

    pub fn register_post_setup(&mut self, component: &str, handler: impl HookHandler + 'static) {
        self.insert(component, HookPoint::PostSetup, Entry::Ready(Box::new(handler)));
    }

    /// Record that a component's hook exists but could not be loaded
    pub fn mark_load_failed(&mut self, component: &str, point: HookPoint<'_>, reason: impl Into<String>) {
        self.insert(component, point, Entry::LoadFailed(reason.into()));
    }

    /// Component names in registration order
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    pub fn lookup(&self, component: &str, point: HookPoint<'_>) -> HookLookup<'_> {
        let Some(component) = self.components.iter().find(|c| c.name == component) else {
            return HookLookup::NotRegistered;
        };
        let entry = match point {
            HookPoint::PostInstall(package) => component.post_install.get(package),
            HookPoint::PostSetup => component.post_setup.as_ref(),
        };
        entry.map_or(HookLookup::NotRegistered, Entry::lookup)
    }

    /// Whether a component has a ready handler at `point`
    pub fn has_hook(&self, component: &str, point: HookPoint<'_>) -> bool {
        matches!(self.lookup(component, point), HookLookup::Ready(_))
    }

    /// Command hooks from the configuration file
    ///
    /// A `script` that cannot be read becomes a load failure for that
    /// component's post-setup hook.
    pub fn from_config(hooks: &[HookConfig]) -> Self {
        let mut registry = Self::new();
        for hook in hooks {
            for (package, commands) in &hook.post_install {
                registry.register_post_install(
                    &hook.component,
                    package,
                    CommandHook::new(commands.clone()),
                );
            }

            let script = match &hook.script {
                None => None,
                Some(path) => {
                    let path = expand_home(path);
                    match std::fs::read_to_string(&path) {
                        Ok(script) => Some(script),
                        Err(e) => {
                            let reason = format!("cannot read {}: {}", path.display(), e);
                            tracing::warn!("Hook script for {}: {}", hook.component, reason);
                            registry.mark_load_failed(&hook.component, HookPoint::PostSetup, reason);
                            continue;
                        }
                    }
                }
            };
            if !hook.post_setup.is_empty() || script.is_some() {
                let mut handler = CommandHook::new(hook.post_setup.clone());
                handler.script = script;
                registry.register_post_setup(&hook.component, handler);
            }
        }
        registry
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Shell commands run as root, then an optional script fed to `sh -s`
pub struct CommandHook {
    commands: Vec<String>,
    script: Option<String>,
}

impl CommandHook {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            script: None,
        }
    }
}

impl HookHandler for CommandHook {
    fn run(&self, remote: &dyn Remote) -> Result<()> {
        for command in &self.commands {
            remote
                .sudo(command)
                .with_context(|| format!("hook command `{command}` failed"))?;
        }
        if let Some(script) = &self.script {
            remote
                .execute(&RemoteCommand::new("sh -s").privileged().with_stdin(script.clone()))
                .context("hook script failed")?;
        }
        Ok(())
    }
}

/// A hook that could not run, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub component: String,
    pub hook: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    /// `component post_install[pkg]` labels of hooks that completed
    pub ran: Vec<String>,
    pub load_failed: Vec<HookFailure>,
    pub failed: Vec<HookFailure>,
}

impl HookReport {
    pub fn merge(&mut self, other: HookReport) {
        self.ran.extend(other.ran);
        self.load_failed.extend(other.load_failed);
        self.failed.extend(other.failed);
    }

    pub fn has_problems(&self) -> bool {
        !self.load_failed.is_empty() || !self.failed.is_empty()
    }
}

/// Fire `points` component by component, in registration order
fn dispatch(
    registry: &HookRegistry,
    points: &[HookPoint<'_>],
    remote: &dyn Remote,
    report: &mut HookReport,
) {
    for (component, &point) in registry
        .components()
        .flat_map(|component| points.iter().map(move |point| (component, point)))
    {
        let failure = |reason: String| HookFailure {
            component: component.to_string(),
            hook: point.to_string(),
            reason,
        };
        match registry.lookup(component, point) {
            HookLookup::NotRegistered => {
                tracing::trace!("[{}] {} has no {} hook", remote.identity(), component, point);
            }
            HookLookup::LoadFailed(reason) => {
                tracing::warn!(
                    "[{}] {} {} hook failed to load: {}",
                    remote.identity(),
                    component,
                    point,
                    reason
                );
                report.load_failed.push(failure(reason.to_string()));
            }
            HookLookup::Ready(handler) => match handler.run(remote) {
                Ok(()) => {
                    tracing::info!("[{}] ran {} {} hook", remote.identity(), component, point);
                    report.ran.push(format!("{component} {point}"));
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] {} {} hook failed: {:#}",
                        remote.identity(),
                        component,
                        point,
                        e
                    );
                    report.failed.push(failure(format!("{e:#}")));
                }
            },
        }
    }
}

/// Run each component's hooks for the packages installed this pass
///
/// The primary project handles all of its packages before the next
/// component sees any.
pub fn dispatch_post_install(
    registry: &HookRegistry,
    installed: &[String],
    remote: &dyn Remote,
) -> HookReport {
    let points: Vec<HookPoint<'_>> = installed
        .iter()
        .map(|package| HookPoint::PostInstall(package))
        .collect();
    let mut report = HookReport::default();
    dispatch(registry, &points, remote, &mut report);
    report
}

pub fn dispatch_post_setup(registry: &HookRegistry, remote: &dyn Remote) -> HookReport {
    let mut report = HookReport::default();
    dispatch(registry, &[HookPoint::PostSetup], remote, &mut report);
    report
}
