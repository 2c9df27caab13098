use super::ssh_key::{operator_key, seed_authorized_keys};
use super::{Step, StepContext, StepError, StepOutcome, home_dir};
use crate::backup::backup_file;
use crate::remote::{Privilege, Remote, RemoteCommand, shell_quote};
use crate::state::keys;

const SUDOERS: &str = "/etc/sudoers";
const SUDOERS_STAGING: &str = "/tmp/sudoers.hostkeep";
const SUDOERS_LINES: &[&str] = &[
    "# Members of the sudo group may gain root privileges",
    "%sudo ALL=(ALL) ALL",
];

enum Lock {
    Locked,
    Skipped,
    Declined(String),
}

/// Create or promote the admin account, then lock the root login
pub struct RootDisablement;

impl RootDisablement {
    /// (root_user, sudo_user) for this host
    fn accounts(ctx: &StepContext<'_>) -> Result<(String, String), StepError> {
        let root_user = ctx.config.root_user.clone();
        if let Some(user) = &ctx.config.host_user {
            return Ok((root_user, user.clone()));
        }
        if !ctx.config.interactive || !ctx.host.roles.is_empty() {
            return Ok((root_user, ctx.host.user.clone()));
        }

        let root_user = ctx
            .prompter
            .input("Default administrator account on the host", &root_user)
            .map_err(|e| ctx.prompt_error(e))?;
        let suggested = if root_user == "root" {
            ctx.host.user.clone()
        } else {
            root_user.clone()
        };
        let sudo_user = ctx
            .prompter
            .input("New or existing account to set up and deploy with", &suggested)
            .map_err(|e| ctx.prompt_error(e))?;
        Ok((root_user, sudo_user))
    }

    /// Backup, edit a staged copy, validate it, then swap it in
    fn patch_sudoers(ctx: &StepContext<'_>, admin: &dyn Remote) -> Result<(), StepError> {
        let staging = shell_quote(SUDOERS_STAGING);
        backup_file(admin, SUDOERS)?;
        admin.sudo(&format!("cp -f -- {} {}", shell_quote(SUDOERS), staging))?;
        for line in SUDOERS_LINES {
            admin.append(SUDOERS_STAGING, line, Privilege::Root)?;
        }

        let check = admin.sudo_warn(&format!("visudo -c -f {staging}"))?;
        if !check.success() {
            admin.sudo(&format!("rm -f -- {staging}"))?;
            let reason = if check.stderr.trim().is_empty() {
                check.stdout.trim().to_string()
            } else {
                check.stderr.trim().to_string()
            };
            return Err(StepError::Validation {
                host: ctx.id(),
                path: SUDOERS.to_string(),
                reason,
            });
        }

        admin.sudo(&format!("cp -f -- {} {}", staging, shell_quote(SUDOERS)))?;
        admin.sudo(&format!("rm -f -- {staging}"))?;
        tracing::info!("[{}] granted the sudo group in {}", ctx.id(), SUDOERS);
        Ok(())
    }

    /// Let `sudo_user` log in with the operator's key before root is locked
    ///
    /// Unattended sessions cannot type a password, so without this the lock
    /// session and every later login would be refused. A missing key is left
    /// for the ssh-key step to report.
    fn seed_key(ctx: &StepContext<'_>, admin: &dyn Remote, sudo_user: &str) -> Result<(), StepError> {
        match operator_key(ctx) {
            Ok(Some((_, keys))) => {
                seed_authorized_keys(admin, sudo_user, &keys)?;
            }
            Ok(None) => tracing::warn!(
                "[{}] no public key found; {} can only log in with a password",
                ctx.id(),
                sudo_user
            ),
            Err(e) => tracing::warn!("[{}] key login for {} not prepared: {}", ctx.id(), sudo_user, e),
        }
        Ok(())
    }

    /// Sub-step (a), run as `root_user`
    ///
    /// Returns the password set on a newly created account, if any.
    fn admin_account(
        ctx: &mut StepContext<'_>,
        root_user: &str,
        sudo_user: &str,
    ) -> Result<(bool, Option<String>), StepError> {
        if sudo_user == root_user || ctx.state.matches(keys::ADMIN_ACCOUNT, &sudo_user.into())? {
            return Ok((false, None));
        }

        let opened;
        let admin: &dyn Remote = if ctx.remote.identity().user == root_user {
            ctx.remote
        } else {
            let identity = ctx.remote.identity().with_user(root_user);
            opened = ctx.connector.connect(&identity, None)?;
            opened.as_ref()
        };

        if !admin.contains("/etc/group", "^sudo:", Privilege::Root)? {
            admin.sudo("groupadd sudo")?;
        }

        let user = shell_quote(sudo_user);
        let mut password = None;
        if !admin.exists(&home_dir(sudo_user), Privilege::Root)? {
            let new_password = match &ctx.config.host_password {
                Some(pw) => pw.clone(),
                None => ctx.new_password(sudo_user)?,
            };
            tracing::info!("[{}] creating sudo account {}", ctx.id(), sudo_user);
            admin.sudo(&format!("useradd -m -s /bin/bash -G sudo {user}"))?;
            admin.execute(
                &RemoteCommand::new("chpasswd")
                    .privileged()
                    .with_stdin(format!("{sudo_user}:{new_password}\n")),
            )?;
            password = Some(new_password);
        } else {
            tracing::info!("[{}] adding {} to sudo and adm", ctx.id(), sudo_user);
            admin.sudo(&format!("usermod -a -G sudo,adm {user}"))?;
            Self::patch_sudoers(ctx, admin)?;
        }
        Self::seed_key(ctx, admin, sudo_user)?;

        ctx.state.set(keys::ADMIN_ACCOUNT, sudo_user.into())?;
        Ok((true, password))
    }

    /// Sub-step (b), run on a fresh session as `sudo_user`
    fn lock_root(
        ctx: &mut StepContext<'_>,
        root_user: &str,
        sudo_user: &str,
        password: Option<String>,
    ) -> Result<Lock, StepError> {
        if sudo_user == root_user || root_user != "root" {
            return Ok(Lock::Skipped);
        }
        if ctx.state.is_set(keys::ROOT_LOCKED)? {
            return Ok(Lock::Skipped);
        }
        let prompt = format!("Disable the root account on {}?", ctx.remote.identity().host);
        if !ctx.gate(ctx.config.disable_root, &prompt, true)? {
            return Ok(Lock::Declined("root account left enabled".to_string()));
        }

        let mut password = password.or_else(|| ctx.config.host_password.clone());
        if password.is_none() && ctx.config.interactive {
            let entered = ctx
                .prompter
                .password(&format!(
                    "Sudo password for {sudo_user} (blank for passwordless sudo)"
                ))
                .map_err(|e| ctx.prompt_error(e))?;
            password = Some(entered).filter(|p| !p.is_empty());
        }

        let identity = ctx.remote.identity().with_user(sudo_user);
        let session = ctx.connector.connect(&identity, password.as_deref())?;
        if session.identity().user == root_user {
            return Err(StepError::LockoutRefused {
                host: session.identity().to_string(),
                user: root_user.to_string(),
            });
        }

        session.sudo(&format!("usermod -L {}", shell_quote(root_user)))?;
        tracing::info!("[{}] locked the {} account", session.identity(), root_user);
        ctx.state.set(keys::ROOT_LOCKED, true.into())?;
        Ok(Lock::Locked)
    }
}

impl Step for RootDisablement {
    fn name(&self) -> &'static str {
        "root"
    }

    fn fail_closed(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let (root_user, sudo_user) = Self::accounts(ctx)?;
        let (admin_changed, password) = Self::admin_account(ctx, &root_user, &sudo_user)?;
        let lock = Self::lock_root(ctx, &root_user, &sudo_user, password)?;

        Ok(match lock {
            Lock::Locked => StepOutcome::Applied,
            _ if admin_changed => StepOutcome::Applied,
            Lock::Declined(reason) => StepOutcome::Declined { reason },
            Lock::Skipped => StepOutcome::NoChange,
        })
    }
}
