//! sshd hardening and its rollback

use tera::Context;

use super::ssh_port::port_line;
use super::{SSHD_CONFIG_PATH, Step, StepContext, StepError, StepOutcome, home_dir, restart_ssh};
use crate::backup::{backup_file, restore_file};
use crate::deploy::{UploadOptions, upload_template};
use crate::remote::Privilege;
use crate::state::keys;
use crate::templates::SSHD_CONFIG;

const PASSWORD_AUTH_COMMENTED: &str = "^#[[:space:]]?PasswordAuthentication[[:space:]]+no";

/// Replace sshd_config with the hardened template
///
/// Refuses to run until the connected user can log in with a key, and asks
/// separately before turning password logins off.
pub struct SshHardening;

impl Step for SshHardening {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn fail_closed(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        if ctx.state.is_set(keys::SSH_RESTRICTED)? {
            return Ok(StepOutcome::NoChange);
        }

        let remote = ctx.remote;
        let user = remote.identity().user.clone();
        let authorized_keys = format!("{}/.ssh/authorized_keys", home_dir(&user));
        if !remote.exists(&authorized_keys, Privilege::Root)? {
            return Ok(StepOutcome::precondition(format!(
                "{authorized_keys} does not exist; upload a key for {user} first"
            )));
        }

        tracing::info!("[{}] restricting sshd", ctx.id());
        backup_file(remote, SSHD_CONFIG_PATH)?;
        let mut context = Context::new();
        context.insert("ssh_port", &ctx.config.ssh_port);
        context.insert(
            "permit_root_login",
            if user == "root" { "prohibit-password" } else { "no" },
        );
        upload_template(
            remote,
            ctx.templates,
            SSHD_CONFIG,
            &context,
            SSHD_CONFIG_PATH,
            UploadOptions::default(),
        )?;
        restart_ssh(remote)?;

        if remote.contains(SSHD_CONFIG_PATH, PASSWORD_AUTH_COMMENTED, Privilege::Root)? {
            let prompt = format!(
                "Disable SSH password logins on {}? Key login for {} must already work",
                remote.identity().host,
                user
            );
            if ctx.gate(ctx.config.disable_ssh_password, &prompt, false)? {
                remote.uncomment(
                    SSHD_CONFIG_PATH,
                    "PasswordAuthentication[[:space:]]+no",
                    Privilege::Root,
                )?;
                restart_ssh(remote)?;
                tracing::info!("[{}] disabled password logins", ctx.id());
            } else {
                tracing::info!("[{}] password logins left enabled", ctx.id());
            }
        }

        ctx.state.set(keys::SSH_RESTRICTED, true.into())?;
        Ok(StepOutcome::Applied)
    }
}

/// Put back the original sshd_config
///
/// The backup predates any port move, so a recorded port is applied again
/// on top of it. The firewall profile only opens that port.
pub fn rollback(ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
    let remote = ctx.remote;
    let restored = restore_file(remote, SSHD_CONFIG_PATH)?;
    let moved_port = ctx
        .state
        .get(keys::SSH_PORT)?
        .and_then(|v| v.as_text().and_then(|port| port.parse::<u16>().ok()));
    let restricted = ctx.state.is_set(keys::SSH_RESTRICTED)?;
    if !restored && !restricted {
        return Ok(StepOutcome::NoChange);
    }

    if let Some(port) = moved_port {
        remote.substitute(
            SSHD_CONFIG_PATH,
            &port_line(ctx.config.default_ssh_port),
            &format!("Port {port}"),
            Privilege::Root,
        )?;
        restart_ssh(remote)?;
    }
    restart_ssh(remote)?;
    ctx.state.delete(keys::SSH_RESTRICTED)?;
    tracing::info!("[{}] rolled back sshd configuration", ctx.id());
    Ok(StepOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path;
    use crate::prompt::Unattended;
    use crate::state::StateValue;
    use crate::steps::testing::Rig;
    use crate::steps::{Firewall, SshPort};

    const ORIGINAL: &str = "Port 22\nPermitRootLogin yes\n";

    fn rig() -> Rig {
        let rig = Rig::new("root");
        rig.host
            .put_file("/root/.ssh/authorized_keys", "ssh-ed25519 AAAA op@laptop\n");
        rig
    }

    #[test]
    fn test_refuses_without_authorized_keys() {
        let rig = Rig::new("root");
        let outcome = rig.apply(&SshHardening).unwrap();
        assert!(matches!(outcome, StepOutcome::PreconditionFailed { .. }));
        assert!(rig.host.mutations().is_empty());
        assert_eq!(rig.state(keys::SSH_RESTRICTED), None);
    }

    #[test]
    fn test_hardens_and_keeps_passwords_when_not_approved() {
        let rig = rig();
        assert_eq!(rig.apply(&SshHardening).unwrap(), StepOutcome::Applied);

        let config = rig.host.file(SSHD_CONFIG_PATH).unwrap();
        assert!(config.lines().any(|l| l == "Port 10022"));
        assert!(config.lines().any(|l| l == "PermitRootLogin prohibit-password"));
        assert!(config.lines().any(|l| l == "#PasswordAuthentication no"));
        assert_eq!(rig.host.count("systemctl restart ssh"), 1);
        assert!(rig.state(keys::SSH_RESTRICTED).is_some());
    }

    #[test]
    fn test_disables_passwords_when_flagged() {
        let mut rig = rig();
        rig.config.disable_ssh_password = true;
        rig.apply(&SshHardening).unwrap();

        let config = rig.host.file(SSHD_CONFIG_PATH).unwrap();
        assert!(config.lines().any(|l| l == "PasswordAuthentication no"));
        assert_eq!(rig.host.count("systemctl restart ssh"), 2);
    }

    #[test]
    fn test_non_root_user_denies_root_login() {
        let rig = Rig::new("deploy");
        rig.host
            .put_file("/home/deploy/.ssh/authorized_keys", "ssh-ed25519 AAAA\n");
        rig.apply(&SshHardening).unwrap();
        let config = rig.host.file(SSHD_CONFIG_PATH).unwrap();
        assert!(config.lines().any(|l| l == "PermitRootLogin no"));
    }

    #[test]
    fn test_second_run_is_noop() {
        let rig = rig();
        rig.apply(&SshHardening).unwrap();
        rig.host.clear_log();
        assert_eq!(rig.apply(&SshHardening).unwrap(), StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }

    #[test]
    fn test_single_backup_across_port_and_hardening() {
        let rig = rig();
        rig.apply(&SshPort).unwrap();
        rig.apply(&SshHardening).unwrap();

        assert_eq!(rig.host.file(&backup_path(SSHD_CONFIG_PATH)).unwrap(), ORIGINAL);
        assert_eq!(rig.host.count("cp -p"), 1);
    }

    #[test]
    fn test_rollback_after_port_change_keeps_port() {
        let rig = rig();
        rig.apply(&SshPort).unwrap();
        rig.apply(&SshHardening).unwrap();
        rig.host.clear_log();

        let outcome = rig.run(&Unattended, |ctx| rollback(ctx)).unwrap();
        assert_eq!(outcome, StepOutcome::Applied);
        assert_eq!(
            rig.host.file(SSHD_CONFIG_PATH).unwrap(),
            "Port 10022\nPermitRootLogin yes\n"
        );
        assert_eq!(rig.host.count("systemctl restart ssh"), 2);
        assert_eq!(
            rig.state(keys::SSH_PORT),
            Some(StateValue::Text("10022".to_string()))
        );
        assert_eq!(rig.state(keys::SSH_RESTRICTED), None);
        assert!(!rig.host.has_path(&backup_path(SSHD_CONFIG_PATH)));

        // hardening can be applied again on the moved port
        assert_eq!(rig.apply(&SshHardening).unwrap(), StepOutcome::Applied);
    }

    #[test]
    fn test_rollback_behind_firewall_stays_reachable() {
        let mut rig = rig();
        rig.config.enable_firewall = true;
        rig.host.put_file("/etc/ufw/ufw.conf", "ENABLED=no\n");
        rig.apply(&SshPort).unwrap();
        rig.apply(&Firewall).unwrap();
        rig.apply(&SshHardening).unwrap();

        rig.run(&Unattended, |ctx| rollback(ctx)).unwrap();

        let profile = rig.host.file("/etc/ufw/applications.d/hostkeep").unwrap();
        assert!(profile.contains("10022"), "{profile}");
        let sshd = rig.host.file(SSHD_CONFIG_PATH).unwrap();
        assert!(sshd.lines().any(|l| l == "Port 10022"), "{sshd}");
        assert!(!sshd.lines().any(|l| l == "Port 22"), "{sshd}");
    }

    #[test]
    fn test_rollback_without_port_restarts_once() {
        let rig = rig();
        rig.apply(&SshHardening).unwrap();
        rig.host.clear_log();

        rig.run(&Unattended, |ctx| rollback(ctx)).unwrap();
        assert_eq!(rig.host.count("systemctl restart ssh"), 1);
        assert_eq!(rig.host.file(SSHD_CONFIG_PATH).unwrap(), ORIGINAL);
    }

    #[test]
    fn test_rollback_of_untouched_host_is_noop() {
        let rig = rig();
        let outcome = rig.run(&Unattended, |ctx| rollback(ctx)).unwrap();
        assert_eq!(outcome, StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }
}
