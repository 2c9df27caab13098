//! Configuration schema for hostkeep
//!
//! Defines the desired state of every managed host. Serialized to/from
//! `~/.config/hostkeep/config.json` (JSONC).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where the per-host state record is persisted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON document on the target host itself
    #[default]
    Remote,
    /// JSON file per host under the local data directory
    Local,
}

/// Command hooks contributed by one component
///
/// Components are dispatched in the order they appear in `hooks`, so the
/// primary project goes first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Component name, e.g. the project or a reusable module
    pub component: String,

    /// Root commands to run after a package is installed, keyed by package name
    #[serde(default)]
    pub post_install: BTreeMap<String, Vec<String>>,

    /// Root commands to run once the node setup pass completes
    #[serde(default)]
    pub post_setup: Vec<String>,

    /// Local shell script run as root after `post_setup`
    #[serde(default)]
    pub script: Option<String>,
}

/// Main configuration structure for hostkeep
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Config file version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Packages that must be installed on every host
    #[serde(default)]
    pub packages: Vec<String>,

    /// Extra apt repositories (`add-apt-repository` arguments)
    #[serde(default)]
    pub package_repositories: Vec<String>,

    /// Run `apt-get upgrade` at most once per day (default: false)
    #[serde(default)]
    pub upgrade_packages: bool,

    /// Stop and disable AppArmor when it is installed (default: false)
    #[serde(default)]
    pub disable_apparmor: bool,

    /// Apache modules to disable whenever apache2 is desired
    #[serde(default = "default_apache_disable_modules")]
    pub apache_disable_modules: Vec<String>,

    /// Default firewall rule set, e.g. `"allow 80/tcp"`
    #[serde(default = "default_firewall_rules")]
    pub firewall_rules: Vec<String>,

    /// Per-role rule sets; the union for a host's roles replaces the default
    #[serde(default)]
    pub role_firewall_rules: BTreeMap<String, Vec<String>>,

    /// Port sshd listens on before hardening (default: 22)
    #[serde(default = "default_default_ssh_port")]
    pub default_ssh_port: u16,

    /// Port sshd is moved to (default: 10022)
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Account used on a fresh host (default: "root")
    #[serde(default = "default_root_user")]
    pub root_user: String,

    /// Administrative account created on the host (default: connected user)
    #[serde(default)]
    pub host_user: Option<String>,

    /// Password for `host_user`, prompted for when absent
    #[serde(default)]
    pub host_password: Option<String>,

    /// Timezone written to /etc/timezone (default: "UTC")
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Ask before destructive changes (default: true)
    #[serde(default = "default_interactive")]
    pub interactive: bool,

    /// Lock the root account without asking (default: false)
    #[serde(default)]
    pub disable_root: bool,

    /// Disable SSH password authentication without asking (default: false)
    #[serde(default)]
    pub disable_ssh_password: bool,

    /// Enable the firewall without asking (default: true)
    #[serde(default = "default_enable_firewall")]
    pub enable_firewall: bool,

    /// Public key to upload; falls back to ~/.ssh/id_ed25519.pub, then id_rsa.pub
    #[serde(default)]
    pub key_filename: Option<String>,

    /// Where host state is persisted (default: remote)
    #[serde(default)]
    pub state_backend: StateBackend,

    /// Attempts allowed to enter a matching password twice (default: 3)
    #[serde(default = "default_max_password_attempts")]
    pub max_password_attempts: u32,

    /// Directory whose `etc/` tree is rendered onto the host's /etc
    #[serde(default)]
    pub etc_templates_dir: Option<String>,

    /// Post-install and post-setup hooks, in dispatch order
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

fn default_version() -> u32 {
    1
}

fn default_apache_disable_modules() -> Vec<String> {
    ["alias", "autoindex", "cgid", "negotiation", "status"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_firewall_rules() -> Vec<String> {
    vec!["allow 80/tcp".to_string(), "allow 443/tcp".to_string()]
}

fn default_default_ssh_port() -> u16 {
    22
}

fn default_ssh_port() -> u16 {
    10022
}

fn default_root_user() -> String {
    "root".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_interactive() -> bool {
    true
}

fn default_enable_firewall() -> bool {
    true
}

fn default_max_password_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            packages: Vec::new(),
            package_repositories: Vec::new(),
            upgrade_packages: false,
            disable_apparmor: false,
            apache_disable_modules: default_apache_disable_modules(),
            firewall_rules: default_firewall_rules(),
            role_firewall_rules: BTreeMap::new(),
            default_ssh_port: default_default_ssh_port(),
            ssh_port: default_ssh_port(),
            root_user: default_root_user(),
            host_user: None,
            host_password: None,
            timezone: default_timezone(),
            interactive: default_interactive(),
            disable_root: false,
            disable_ssh_password: false,
            enable_firewall: default_enable_firewall(),
            key_filename: None,
            state_backend: StateBackend::default(),
            max_password_attempts: default_max_password_attempts(),
            etc_templates_dir: None,
            hooks: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new Config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Firewall rules for a host with the given roles
    ///
    /// The union of the role rule sets, in role order with duplicates removed,
    /// replaces the default set. An empty union falls back to the default set.
    pub fn firewall_rules_for(&self, roles: &[String]) -> Vec<String> {
        let mut rules: Vec<String> = Vec::new();
        for role in roles {
            if let Some(set) = self.role_firewall_rules.get(role) {
                for rule in set {
                    let rule = rule.trim();
                    if !rule.is_empty() && !rules.iter().any(|r| r == rule) {
                        rules.push(rule.to_string());
                    }
                }
            }
        }
        if rules.is_empty() {
            for rule in &self.firewall_rules {
                let rule = rule.trim();
                if !rule.is_empty() && !rules.iter().any(|r| r == rule) {
                    rules.push(rule.to_string());
                }
            }
        }
        rules
    }

    /// Whether `package` is part of the desired package set
    pub fn wants_package(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }

    /// Check the values serde cannot express as types
    pub fn validate(&self) -> Result<(), String> {
        if self.ssh_port == 0 || self.default_ssh_port == 0 {
            return Err("ssh ports must be non-zero".to_string());
        }
        if self.max_password_attempts == 0 {
            return Err("max_password_attempts must be at least 1".to_string());
        }
        if self.root_user.trim().is_empty() {
            return Err("root_user must not be empty".to_string());
        }
        if self.timezone.trim().is_empty() {
            return Err("timezone must not be empty".to_string());
        }
        for hook in &self.hooks {
            if hook.component.trim().is_empty() {
                return Err("every hook entry needs a component name".to_string());
            }
        }
        Ok(())
    }
}
