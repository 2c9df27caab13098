//! Host state store
//!
//! A small key-value record per host of which reconciliation steps have
//! completed, and with what parameters. A key's presence means the step
//! completed; absence means it never ran or was rolled back.
//!
//! Reads never turn a failure into "absent": an unreachable host or a corrupt
//! record is an error, so a step is never re-applied on a guess.

mod local;
mod remote;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{StateBackend, get_state_dir};
use crate::host::HostError;
use crate::remote::Remote;

pub use local::LocalStateStore;
pub use remote::{REMOTE_STATE_DIR, REMOTE_STATE_PATH, RemoteStateStore};

/// State keys written by the reconciliation steps
pub mod keys {
    /// List of configured apt repositories
    pub const PACKAGE_REPOSITORIES: &str = "package_repositories";
    /// Day (YYYY-MM-DD, UTC) of the last full upgrade
    pub const PACKAGES_UPGRADED: &str = "packages_upgraded";
    /// Administrative account created or promoted
    pub const ADMIN_ACCOUNT: &str = "admin_account";
    pub const ROOT_LOCKED: &str = "root_locked";
    /// Port sshd was moved to
    pub const SSH_PORT: &str = "ssh_port";
    pub const SSH_RESTRICTED: &str = "ssh_restricted";
    pub const APPARMOR_DISABLED: &str = "apparmor_disabled";
    pub const PYTHON_TOOLING: &str = "python_tooling_installed";
    /// SSH port the ufw profiles were rendered for
    pub const FIREWALL_PROFILE_VERSION: &str = "firewall_profile_version";
    /// Every firewall rule issued so far
    pub const FIREWALL_RULES: &str = "firewall_rules";

    pub const ALL: &[&str] = &[
        PACKAGE_REPOSITORIES,
        PACKAGES_UPGRADED,
        ADMIN_ACCOUNT,
        ROOT_LOCKED,
        SSH_PORT,
        SSH_RESTRICTED,
        APPARMOR_DISABLED,
        PYTHON_TOOLING,
        FIREWALL_PROFILE_VERSION,
        FIREWALL_RULES,
    ];
}

/// Value stored under a state key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl StateValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whether the value marks a completed step
    pub fn is_truthy(&self) -> bool {
        !matches!(self, StateValue::Bool(false))
    }

    /// Parse a value typed on the command line: `true`/`false`, `a,b,c` or text
    pub fn parse_cli(input: &str) -> Self {
        match input {
            "true" => StateValue::Bool(true),
            "false" => StateValue::Bool(false),
            _ if input.contains(',') => StateValue::List(
                input
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => StateValue::Text(input.to_string()),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Text(s) => write!(f, "{s}"),
            StateValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<Vec<String>> for StateValue {
    fn from(value: Vec<String>) -> Self {
        StateValue::List(value)
    }
}

/// Persisted record for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub host: String,
    #[serde(default)]
    pub entries: BTreeMap<String, StateValue>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl StateRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            host: host.into(),
            entries: BTreeMap::new(),
            updated_at: None,
        }
    }

    pub fn set(&mut self, key: &str, value: StateValue) {
        self.entries.insert(key.to_string(), value);
        self.touch();
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self).map(|mut json| {
            json.push('\n');
            json
        })
    }
}

/// Errors from reading or writing a host's state record
#[derive(Error, Debug)]
pub enum StateError {
    /// The host could not be asked; never read as "absent"
    #[error(transparent)]
    Transport(#[from] HostError),

    #[error("{host}: state record {path} is corrupt: {reason}")]
    Corrupt {
        host: String,
        path: String,
        reason: String,
    },

    #[error("{host}: failed to persist state to {path}: {reason}")]
    Io {
        host: String,
        path: String,
        reason: String,
    },
}

/// Key-value access to one host's record
pub trait StateStore {
    /// Host namespace this store is scoped to
    fn namespace(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<StateValue>, StateError>;

    fn set(&mut self, key: &str, value: StateValue) -> Result<(), StateError>;

    /// Remove `key`; true if it was present
    fn delete(&mut self, key: &str) -> Result<bool, StateError>;

    /// Every recorded key, for inspection
    fn entries(&self) -> Result<BTreeMap<String, StateValue>, StateError>;

    /// Present and not `false`
    fn is_set(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.get(key)?.is_some_and(|v| v.is_truthy()))
    }

    /// Present with exactly `expected`
    fn matches(&self, key: &str, expected: &StateValue) -> Result<bool, StateError> {
        Ok(self.get(key)?.as_ref() == Some(expected))
    }
}

/// Open the configured backend for the host `remote` is connected to
///
/// `state_dir` overrides the local backend's directory.
pub fn open_store<'a>(
    backend: StateBackend,
    remote: &'a dyn Remote,
    state_dir: Option<&Path>,
) -> Result<Box<dyn StateStore + 'a>, StateError> {
    match backend {
        StateBackend::Remote => Ok(Box::new(RemoteStateStore::new(remote))),
        StateBackend::Local => {
            let namespace = remote.identity().namespace().to_string();
            let dir = match state_dir {
                Some(dir) => dir.to_path_buf(),
                None => get_state_dir().ok_or_else(|| StateError::Io {
                    host: namespace.clone(),
                    path: "<state dir>".to_string(),
                    reason: "Could not determine local state directory".to_string(),
                })?,
            };
            Ok(Box::new(LocalStateStore::open(&dir, &namespace)?))
        }
    }
}
