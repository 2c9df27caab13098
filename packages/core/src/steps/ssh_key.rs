//! Operator public key upload and its rollback

use std::path::{Path, PathBuf};

use super::{Step, StepContext, StepError, StepOutcome, home_dir};
use crate::backup::{backup_file, has_backup, restore_file};
use crate::host::HostError;
use crate::remote::{Privilege, Remote, RemoteCommand, shell_quote};

const DEFAULT_KEYS: &[&str] = &[".ssh/id_ed25519.pub", ".ssh/id_rsa.pub"];

fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Local public key to upload
///
/// An explicit `key_filename` must exist. Without one, the usual key files
/// under `home` are tried in order; `Ok(None)` means none was found.
pub fn locate_public_key(
    key_filename: Option<&str>,
    home: Option<&Path>,
) -> Result<Option<PathBuf>, PathBuf> {
    if let Some(explicit) = key_filename {
        let path = expand_home(explicit, home);
        return if path.is_file() { Ok(Some(path)) } else { Err(path) };
    }
    Ok(home.and_then(|home| {
        DEFAULT_KEYS
            .iter()
            .map(|rel| home.join(rel))
            .find(|path| path.is_file())
    }))
}

/// Key lines as they will be compared against authorized_keys
///
/// Only the line terminator is removed; other trailing whitespace is kept.
pub fn key_lines(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// The operator's key file and its lines; `None` when no key file is found
pub(crate) fn operator_key(
    ctx: &StepContext<'_>,
) -> Result<Option<(PathBuf, Vec<String>)>, StepError> {
    let home = dirs::home_dir();
    let key_file = match locate_public_key(ctx.config.key_filename.as_deref(), home.as_deref()) {
        Ok(Some(path)) => path,
        Ok(None) => return Ok(None),
        Err(path) => {
            return Err(StepError::KeyFileMissing {
                host: ctx.id(),
                path: path.display().to_string(),
            });
        }
    };
    let content = std::fs::read_to_string(&key_file).map_err(|source| StepError::LocalIo {
        host: ctx.id(),
        path: key_file.display().to_string(),
        source,
    })?;
    let keys = key_lines(&content);
    Ok(Some((key_file, keys)))
}

/// Install `keys` for another account from a root session
///
/// Used while bootstrapping, when `user` cannot log in yet. Returns true if
/// a key was added. Ownership and modes are fixed only when something changed.
pub(crate) fn seed_authorized_keys(
    admin: &dyn Remote,
    user: &str,
    keys: &[String],
) -> Result<bool, HostError> {
    let dir = format!("{}/.ssh", home_dir(user));
    let authorized_keys = format!("{dir}/authorized_keys");
    if !admin.exists(&dir, Privilege::Root)? {
        admin.sudo(&format!("mkdir -m 700 -p -- {}", shell_quote(&dir)))?;
    }
    let mut appended = false;
    for key in keys {
        appended |= admin.append(&authorized_keys, key, Privilege::Root)?;
    }
    if appended {
        admin.sudo(&format!("chown -R {}: -- {}", shell_quote(user), shell_quote(&dir)))?;
        admin.sudo(&format!("chmod 700 -- {}", shell_quote(&dir)))?;
        admin.sudo(&format!("chmod 600 -- {}", shell_quote(&authorized_keys)))?;
        tracing::info!("[{}] seeded {} for {}", admin.identity(), authorized_keys, user);
    }
    Ok(appended)
}

fn ssh_dir(ctx: &StepContext<'_>) -> String {
    format!("{}/.ssh", home_dir(&ctx.remote.identity().user))
}

pub struct SshKey;

impl Step for SshKey {
    fn name(&self) -> &'static str {
        "ssh-key"
    }

    fn fail_closed(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let Some((key_file, keys)) = operator_key(ctx)? else {
            tracing::warn!(
                "[{}] no public key found in ~/.ssh; skipping key upload",
                ctx.id()
            );
            return Ok(StepOutcome::NoChange);
        };

        let remote = ctx.remote;
        let dir = ssh_dir(ctx);
        let authorized_keys = format!("{dir}/authorized_keys");
        let mut changed = false;

        if !remote.exists(&dir, Privilege::User)? {
            remote.run(&format!("mkdir -m 700 -p -- {}", shell_quote(&dir)))?;
            changed = true;
        }
        let present = remote.read_file(&authorized_keys, Privilege::User)?;
        let missing: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                present
                    .as_deref()
                    .is_none_or(|text| !text.split('\n').any(|l| l == key))
            })
            .collect();
        if !missing.is_empty() && present.is_some() {
            backup_file(remote, &authorized_keys)?;
        }

        let mut appended = false;
        for line in &missing {
            appended |= remote.append(&authorized_keys, line, Privilege::User)?;
        }
        if appended {
            remote.execute(&RemoteCommand::new(format!(
                "chmod 600 -- {}",
                shell_quote(&authorized_keys)
            )))?;
            tracing::info!(
                "[{}] added {} to {}",
                ctx.id(),
                key_file.display(),
                authorized_keys
            );
        }

        Ok(if changed || appended {
            StepOutcome::Applied
        } else {
            StepOutcome::NoChange
        })
    }
}

/// Restore authorized_keys, or remove the `.ssh` directory hostkeep created
pub fn rollback(ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
    let remote = ctx.remote;
    let dir = ssh_dir(ctx);
    let authorized_keys = format!("{dir}/authorized_keys");

    if has_backup(remote, &authorized_keys)? {
        restore_file(remote, &authorized_keys)?;
        return Ok(StepOutcome::Applied);
    }
    if remote.exists(&dir, Privilege::Root)? {
        remote.sudo(&format!("rm -rf -- {}", shell_quote(&dir)))?;
        tracing::info!("[{}] removed {}", ctx.id(), dir);
        return Ok(StepOutcome::Applied);
    }
    Ok(StepOutcome::NoChange)
}
