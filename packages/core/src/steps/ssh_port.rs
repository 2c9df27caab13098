use super::{SSHD_CONFIG_PATH, Step, StepContext, StepError, StepOutcome, restart_ssh};
use crate::backup::backup_file;
use crate::remote::Privilege;
use crate::state::keys;

/// Pattern for the `Port` line of sshd_config set to `port`
pub(crate) fn port_line(port: u16) -> String {
    format!("^Port[[:space:]]+{port}[[:space:]]*$")
}

/// Move sshd off the default port
///
/// The session is multiplexed, so the restart leaves it connected.
pub struct SshPort;

impl Step for SshPort {
    fn name(&self) -> &'static str {
        "ssh-port"
    }

    fn fail_closed(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let to = ctx.config.ssh_port;
        // a port moved by an earlier run is the one sshd_config now names
        let from = ctx
            .state
            .get(keys::SSH_PORT)?
            .and_then(|v| v.as_text().and_then(|port| port.parse::<u16>().ok()))
            .unwrap_or(ctx.config.default_ssh_port);
        if from == to {
            return Ok(StepOutcome::NoChange);
        }

        tracing::info!("[{}] moving sshd from port {} to {}", ctx.id(), from, to);
        backup_file(ctx.remote, SSHD_CONFIG_PATH)?;
        ctx.remote.substitute(
            SSHD_CONFIG_PATH,
            &port_line(from),
            &format!("Port {to}"),
            Privilege::Root,
        )?;
        if !ctx.remote.contains(SSHD_CONFIG_PATH, &port_line(to), Privilege::Root)? {
            return Err(StepError::Validation {
                host: ctx.id(),
                path: SSHD_CONFIG_PATH.to_string(),
                reason: format!("no `Port {from}` line to move to {to}"),
            });
        }
        restart_ssh(ctx.remote)?;
        ctx.state.set(keys::SSH_PORT, to.to_string().into())?;
        Ok(StepOutcome::Applied)
    }
}
