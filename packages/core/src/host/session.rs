//! OpenSSH-backed sessions
//!
//! Each command is one `ssh` process. Connections are multiplexed through a
//! `ControlMaster` socket so that restarting sshd or moving its port does
//! not cut a running setup pass.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

use super::error::HostError;
use super::identity::HostIdentity;
use super::schema::HostConfig;
use crate::remote::{
    CommandOutput, Connector, Executor, Privilege, FileOps, Remote, RemoteCommand, shell,
    shell_quote,
};

/// ssh reserves this status for its own failures
///
/// ssh also passes a remote command's own exit status through unchanged, so
/// a remote command that exits 255 cannot be told apart from a failed
/// connection. It is classified as a transport failure; remote commands
/// run by the steps never use 255 deliberately.
const SSH_TRANSPORT_STATUS: i32 = 255;

/// A session to one host as one identity
#[derive(Debug, Clone)]
pub struct SshSession {
    identity: HostIdentity,
    identity_file: Option<String>,
    jump_host: Option<String>,
    sudo_password: Option<String>,
    batch_mode: bool,
    control_dir: Option<PathBuf>,
}

impl SshSession {
    pub fn new(identity: HostIdentity) -> Self {
        Self {
            identity,
            identity_file: None,
            jump_host: None,
            sudo_password: None,
            batch_mode: true,
            control_dir: None,
        }
    }

    /// Session using an inventory entry's key and jump host
    pub fn for_host(identity: HostIdentity, host: &HostConfig) -> Self {
        let mut session = Self::new(identity);
        session.identity_file = host.identity_file.clone();
        session.jump_host = host.jump_host.clone();
        session
    }

    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_jump_host(mut self, jump: impl Into<String>) -> Self {
        self.jump_host = Some(jump.into());
        self
    }

    /// Password fed to `sudo -S` for privileged commands
    pub fn with_sudo_password(mut self, password: Option<String>) -> Self {
        self.sudo_password = password;
        self
    }

    /// Allow ssh to prompt for passwords and passphrases on the terminal
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.batch_mode = !interactive;
        self
    }

    /// Directory for the multiplexing control socket
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = Some(dir.into());
        self
    }

    /// Build the base ssh invocation, without the remote command
    fn build_ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");

        cmd.arg("-o")
            .arg(format!(
                "BatchMode={}",
                if self.batch_mode { "yes" } else { "no" }
            ))
            .arg("-o")
            .arg("ConnectTimeout=30")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");

        if let Some(dir) = &self.control_dir {
            cmd.arg("-o")
                .arg("ControlMaster=auto")
                .arg("-o")
                .arg(format!("ControlPath={}", dir.join("%C").display()))
                .arg("-o")
                .arg("ControlPersist=120");
        }

        cmd.arg("-p").arg(self.identity.port.to_string());
        if let Some(key) = &self.identity_file {
            cmd.arg("-i").arg(key);
        }
        if let Some(jump) = &self.jump_host {
            cmd.arg("-J").arg(jump);
        }

        cmd.arg(self.identity.destination());
        cmd
    }

    /// Remote command line and stdin for `command`, with sudo applied
    fn wrap(&self, command: &RemoteCommand) -> (String, Option<String>) {
        let needs_sudo = command.privilege == Privilege::Root && self.identity.user != "root";
        if !needs_sudo {
            return (command.line.clone(), command.stdin.clone());
        }

        let quoted = shell_quote(&command.line);
        match &self.sudo_password {
            Some(password) => {
                // sudo consumes the first line, the command gets the rest
                let mut input = format!("{password}\n");
                if let Some(stdin) = &command.stdin {
                    input.push_str(stdin);
                }
                (format!("sudo -S -p '' sh -c {quoted}"), Some(input))
            }
            None => (format!("sudo -n sh -c {quoted}"), command.stdin.clone()),
        }
    }
}

/// Run `cmd` to completion, feeding it `stdin` and collecting both outputs
///
/// The input is written from its own thread: a command may fill its stdout
/// pipe before it has read all of its input.
fn run_with_input(mut cmd: Command, stdin: Option<String>) -> Result<Output, HostError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HostError::SshSpawn("SSH not found. Install OpenSSH client.".to_string())
        } else {
            HostError::SshSpawn(e.to_string())
        }
    })?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            Some(thread::spawn(move || pipe.write_all(input.as_bytes())))
        }
        _ => None,
    };

    let output = child
        .wait_with_output()
        .map_err(|e| HostError::SshSpawn(e.to_string()))?;

    match feeder.map(|feeder| feeder.join()) {
        None | Some(Ok(Ok(()))) => Ok(output),
        // the command exited without reading all of its input
        Some(Ok(Err(e))) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(output),
        Some(Ok(Err(e))) => Err(HostError::SshSpawn(format!("Failed to write stdin: {e}"))),
        Some(Err(_)) => Err(HostError::SshSpawn("stdin writer panicked".to_string())),
    }
}

impl Executor for SshSession {
    fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, HostError> {
        let (line, stdin) = self.wrap(command);
        tracing::debug!("[{}] {}", self.identity, command.line);

        let mut cmd = self.build_ssh_command();
        cmd.arg(&line);
        let output = run_with_input(cmd, stdin)?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(SSH_TRANSPORT_STATUS),
        };

        if result.status == SSH_TRANSPORT_STATUS {
            return Err(classify_transport_failure(
                &self.identity,
                self.identity_file.as_deref(),
                &result.stderr,
            ));
        }

        if !result.success() && !command.warn_only {
            return Err(HostError::CommandFailed {
                host: self.identity.to_string(),
                command: command.line.clone(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }

        if !result.success() {
            tracing::debug!(
                "[{}] exit {} tolerated: {}",
                self.identity,
                result.status,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}

impl FileOps for SshSession {
    fn exists(&self, path: &str, privilege: Privilege) -> Result<bool, HostError> {
        shell::exists(self, path, privilege)
    }

    fn contains(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<bool, HostError> {
        shell::contains(self, path, pattern, privilege)
    }

    fn comment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError> {
        shell::comment(self, path, pattern, privilege)
    }

    fn uncomment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError> {
        shell::uncomment(self, path, pattern, privilege)
    }

    fn substitute(
        &self,
        path: &str,
        before: &str,
        after: &str,
        privilege: Privilege,
    ) -> Result<(), HostError> {
        shell::substitute(self, path, before, after, privilege)
    }

    fn append(&self, path: &str, line: &str, privilege: Privilege) -> Result<bool, HostError> {
        shell::append(self, path, line, privilege)
    }

    fn read_file(&self, path: &str, privilege: Privilege) -> Result<Option<String>, HostError> {
        shell::read_file(self, path, privilege)
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        privilege: Privilege,
    ) -> Result<bool, HostError> {
        shell::write_file(self, path, content, privilege)
    }
}

/// Map an ssh status-255 failure to an authentication or reachability error
fn classify_transport_failure(
    identity: &HostIdentity,
    key_hint: Option<&str>,
    stderr: &str,
) -> HostError {
    if stderr.contains("Permission denied") || stderr.contains("Too many authentication failures")
    {
        HostError::AuthFailed {
            host: identity.to_string(),
            key_hint: key_hint.map(str::to_string),
        }
    } else {
        let reason = stderr.trim();
        HostError::Unreachable {
            host: identity.to_string(),
            reason: if reason.is_empty() {
                "ssh exited with status 255".to_string()
            } else {
                reason.to_string()
            },
        }
    }
}

/// Opens [`SshSession`]s for one inventory entry
#[derive(Debug, Clone)]
pub struct SshConnector {
    host: HostConfig,
    interactive: bool,
    control_dir: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(host: HostConfig) -> Self {
        Self {
            host,
            interactive: false,
            control_dir: None,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Enable multiplexing with control sockets under `dir`
    pub fn with_control_dir(mut self, dir: &Path) -> Self {
        self.control_dir = Some(dir.to_path_buf());
        self
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        identity: &HostIdentity,
        sudo_password: Option<&str>,
    ) -> Result<Box<dyn Remote>, HostError> {
        if let Some(dir) = &self.control_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                HostError::SshSpawn(format!(
                    "Failed to create control socket directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        let mut session = SshSession::for_host(identity.clone(), &self.host)
            .with_sudo_password(sudo_password.map(str::to_string))
            .interactive(self.interactive);
        if let Some(dir) = &self.control_dir {
            session = session.with_control_dir(dir);
        }
        tracing::debug!("Opened session {}", identity);
        Ok(Box::new(session))
    }
}
