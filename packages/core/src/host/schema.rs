//! Host inventory schema
//!
//! Data structures for the managed hosts stored in hosts.json.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identity::{DEFAULT_SSH_PORT, HostIdentity};

/// Inventory entry for one managed host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// SSH hostname or IP address
    pub hostname: String,

    /// SSH username once the host is set up (default: current user from whoami)
    #[serde(default = "default_user")]
    pub user: String,

    /// SSH port once the host is set up (default: the configured `ssh_port`)
    #[serde(default)]
    pub port: Option<u16>,

    /// Path to SSH identity file (private key)
    #[serde(default)]
    pub identity_file: Option<String>,

    /// Jump host for ProxyJump (user@host:port format)
    #[serde(default)]
    pub jump_host: Option<String>,

    /// Roles selecting per-role firewall rule sets
    #[serde(default)]
    pub roles: Vec<String>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_user() -> String {
    whoami::username()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            user: default_user(),
            port: None,
            identity_file: None,
            jump_host: None,
            roles: Vec::new(),
            description: None,
        }
    }
}

impl HostConfig {
    /// Create a new host config with just hostname
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    /// Builder pattern: set user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder pattern: set identity file
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Builder pattern: set jump host
    pub fn with_jump_host(mut self, jump: impl Into<String>) -> Self {
        self.jump_host = Some(jump.into());
        self
    }

    /// Builder pattern: add role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Builder pattern: set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Identity of the settled host: inventory user at `port`, or `fallback_port`
    pub fn identity(&self, fallback_port: u16) -> HostIdentity {
        HostIdentity::new(
            self.user.clone(),
            &self.hostname,
            self.port.unwrap_or(fallback_port),
        )
    }

    /// Build an inventory entry from an ad-hoc `[user@]host[:port]` address
    pub fn from_identity(identity: &HostIdentity) -> Self {
        let mut config = HostConfig::new(identity.host.clone()).with_user(identity.user.clone());
        if identity.port != DEFAULT_SSH_PORT {
            config.port = Some(identity.port);
        }
        config
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Root structure for hosts.json file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostsFile {
    /// Schema version for future migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Map of host name to configuration
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

fn default_version() -> u32 {
    1
}

impl HostsFile {
    /// Create empty hosts file
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, name: impl Into<String>, config: HostConfig) {
        self.hosts.insert(name.into(), config);
    }

    pub fn remove_host(&mut self, name: &str) -> Option<HostConfig> {
        self.hosts.remove(name)
    }

    pub fn get_host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.get(name)
    }

    pub fn has_host(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// Host names in sorted order
    pub fn host_names(&self) -> Vec<&str> {
        self.hosts.keys().map(|s| s.as_str()).collect()
    }

    /// Hosts carrying `role`, in name order
    pub fn hosts_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = (&'a str, &'a HostConfig)> {
        self.hosts
            .iter()
            .filter(move |(_, config)| config.has_role(role))
            .map(|(name, config)| (name.as_str(), config))
    }
}
