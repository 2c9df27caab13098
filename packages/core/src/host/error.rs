//! Host-specific error types
//!
//! Errors that can occur while talking to a managed host or its inventory.

use thiserror::Error;

/// Errors that can occur during host operations
#[derive(Error, Debug)]
pub enum HostError {
    /// Failed to spawn the SSH process
    #[error("Failed to spawn SSH: {0}")]
    SshSpawn(String),

    /// The host could not be reached; never interpreted as "not configured"
    #[error("{host}: host unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// SSH authentication failed (key not in agent, passphrase needed)
    #[error("{host}: SSH authentication failed. Ensure your key is loaded: ssh-add {}", .key_hint.as_deref().unwrap_or("~/.ssh/id_ed25519"))]
    AuthFailed {
        host: String,
        key_hint: Option<String>,
    },

    /// A remote command exited non-zero outside warn-only mode
    #[error("{host}: `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// The remote distribution cannot be managed
    #[error("{host}: unsupported distribution: {distro}")]
    UnsupportedDistro { host: String, distro: String },

    /// Host not found in hosts.json
    #[error("Host not found: {0}")]
    NotFound(String),

    /// Host already exists
    #[error("Host already exists: {0}")]
    AlreadyExists(String),

    /// Failed to load hosts file
    #[error("Failed to load hosts file: {0}")]
    LoadFailed(String),

    /// Failed to save hosts file
    #[error("Failed to save hosts file: {0}")]
    SaveFailed(String),

    /// Invalid host configuration or address
    #[error("Invalid host configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read ~/.ssh/config
    #[error("Failed to read SSH config: {0}")]
    SshConfigRead(String),

    /// Failed to write ~/.ssh/config
    #[error("Failed to write SSH config: {0}")]
    SshConfigWrite(String),
}

impl HostError {
    /// Transport-level failure: the command never ran to completion
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HostError::SshSpawn(_) | HostError::Unreachable { .. } | HostError::AuthFailed { .. }
        )
    }
}
