//! ~/.ssh/config lookups
//!
//! Fills inventory defaults (user, port, key, jump host) from the operator's
//! SSH client configuration when a host is added.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use ssh2_config::{ParseRule, SshConfig};

use super::error::HostError;
use super::schema::HostConfig;

/// Settings found in the user's SSH config for a host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SshConfigMatch {
    pub host_name: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub proxy_jump: Option<String>,
}

impl SshConfigMatch {
    /// Check if any useful settings were found
    pub fn has_settings(&self) -> bool {
        self.host_name.is_some()
            || self.user.is_some()
            || self.port.is_some()
            || self.identity_file.is_some()
            || self.proxy_jump.is_some()
    }

    /// Format found settings for display
    pub fn display_settings(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.host_name {
            parts.push(format!("HostName={name}"));
        }
        if let Some(user) = &self.user {
            parts.push(format!("User={user}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("Port={port}"));
        }
        if let Some(key) = &self.identity_file {
            parts.push(format!("IdentityFile={key}"));
        }
        if let Some(jump) = &self.proxy_jump {
            parts.push(format!("ProxyJump={jump}"));
        }
        parts.join(", ")
    }

    /// Fill the fields an inventory entry left unset
    pub fn apply_to(&self, config: &mut HostConfig, user_given: bool) {
        if !user_given {
            if let Some(user) = &self.user {
                config.user = user.clone();
            }
        }
        if config.port.is_none() {
            config.port = self.port;
        }
        if config.identity_file.is_none() {
            config.identity_file = self.identity_file.clone();
        }
        if config.jump_host.is_none() {
            config.jump_host = self.proxy_jump.clone();
        }
    }
}

/// Get the path to the user's SSH config file
pub fn get_ssh_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("config"))
}

/// Query ~/.ssh/config for a hostname
///
/// Returns an empty match when the file doesn't exist.
pub fn query_ssh_config(hostname: &str) -> Result<SshConfigMatch, HostError> {
    let config_path = match get_ssh_config_path() {
        Some(path) if path.exists() => path,
        _ => {
            tracing::debug!("No SSH config file found");
            return Ok(SshConfigMatch::default());
        }
    };

    let file = File::open(&config_path).map_err(|e| {
        HostError::SshConfigRead(format!("Failed to open {}: {}", config_path.display(), e))
    })?;
    query_ssh_config_in(&mut BufReader::new(file), hostname)
}

/// Query SSH client configuration read from `reader`
pub fn query_ssh_config_in(
    reader: &mut impl BufRead,
    hostname: &str,
) -> Result<SshConfigMatch, HostError> {
    let config = SshConfig::default()
        .parse(reader, ParseRule::ALLOW_UNKNOWN_FIELDS)
        .map_err(|e| HostError::SshConfigRead(format!("Failed to parse SSH config: {e}")))?;

    let params = config.query(hostname);

    let mut result = SshConfigMatch {
        host_name: params.host_name,
        user: params.user,
        port: params.port,
        ..Default::default()
    };
    if let Some(files) = params.identity_file {
        // first IdentityFile wins, as in ssh itself
        if let Some(first) = files.first() {
            result.identity_file = Some(first.to_string_lossy().to_string());
        }
    }
    if let Some(jump) = params.proxy_jump {
        if !jump.is_empty() {
            result.proxy_jump = Some(jump.join(","));
        }
    }

    Ok(result)
}
