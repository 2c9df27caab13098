//! Remote execution and file operation contracts
//!
//! Reconciliation steps reach a target host only through these traits.
//! [`crate::host::SshSession`] implements them over the system `ssh` client.

pub mod shell;

use crate::host::{HostError, HostIdentity};

pub use shell::{escape_ere, shell_quote};

/// Account a command runs as on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// The connected user
    User,
    /// Root, through sudo unless already connected as root
    Root,
}

/// One command line to run on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub line: String,
    pub privilege: Privilege,
    /// Return non-zero exits as output instead of an error
    pub warn_only: bool,
    /// Fed to the command's standard input
    pub stdin: Option<String>,
}

impl RemoteCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            privilege: Privilege::User,
            warn_only: false,
            stdin: None,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privilege = Privilege::Root;
        self
    }

    pub fn as_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn warn_only(mut self) -> Self {
        self.warn_only = true;
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured result of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs commands on one host as one connected identity
///
/// A non-zero exit is `HostError::CommandFailed` unless the command is
/// warn-only. A transport failure is always an error.
pub trait Executor {
    /// Who this session is connected as
    fn identity(&self) -> &HostIdentity;

    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, HostError>;

    fn run(&self, line: &str) -> Result<CommandOutput, HostError> {
        self.execute(&RemoteCommand::new(line))
    }

    fn sudo(&self, line: &str) -> Result<CommandOutput, HostError> {
        self.execute(&RemoteCommand::new(line).privileged())
    }

    fn run_warn(&self, line: &str) -> Result<CommandOutput, HostError> {
        self.execute(&RemoteCommand::new(line).warn_only())
    }

    fn sudo_warn(&self, line: &str) -> Result<CommandOutput, HostError> {
        self.execute(&RemoteCommand::new(line).privileged().warn_only())
    }
}

/// Remote file state checks and line-level edits
///
/// Patterns are POSIX extended regular expressions matched per line.
pub trait FileOps {
    fn exists(&self, path: &str, privilege: Privilege) -> Result<bool, HostError>;

    /// Whether any line of `path` matches `pattern`; false when the file is missing
    fn contains(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<bool, HostError>;

    /// Prefix lines matching `pattern` with `#`
    fn comment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError>;

    /// Drop the leading `#` of commented lines matching `pattern`
    fn uncomment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError>;

    /// Replace every match of `before` with the literal text `after`
    fn substitute(
        &self,
        path: &str,
        before: &str,
        after: &str,
        privilege: Privilege,
    ) -> Result<(), HostError>;

    /// Append `line` unless an identical whole line is present; true if appended
    fn append(&self, path: &str, line: &str, privilege: Privilege) -> Result<bool, HostError>;

    /// File content, or `None` when there is no such regular file
    fn read_file(&self, path: &str, privilege: Privilege) -> Result<Option<String>, HostError>;

    /// Replace the file content; true if it changed
    fn write_file(&self, path: &str, content: &str, privilege: Privilege)
    -> Result<bool, HostError>;
}

/// A connected session: commands plus file operations
pub trait Remote: Executor + FileOps {}

impl<T: Executor + FileOps + ?Sized> Remote for T {}

/// Opens sessions to a host as a chosen identity
pub trait Connector {
    fn connect(
        &self,
        identity: &HostIdentity,
        sudo_password: Option<&str>,
    ) -> Result<Box<dyn Remote>, HostError>;
}

/// Parent directory of a remote absolute path
pub fn remote_parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_builders() {
        let cmd = RemoteCommand::new("ufw reload").privileged().warn_only();
        assert_eq!(cmd.privilege, Privilege::Root);
        assert!(cmd.warn_only);
        assert!(cmd.stdin.is_none());

        let cmd = RemoteCommand::new("chpasswd").with_stdin("deploy:secret\n");
        assert_eq!(cmd.privilege, Privilege::User);
        assert_eq!(cmd.stdin.as_deref(), Some("deploy:secret\n"));
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/etc/ssh/sshd_config"), "/etc/ssh");
        assert_eq!(remote_parent("/etc"), "/");
        assert_eq!(remote_parent("/etc/cron.d/"), "/etc");
        assert_eq!(remote_parent("relative"), ".");
    }
}
