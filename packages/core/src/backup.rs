//! One-shot backups of remote files
//!
//! The first edit of a file copies it to `<path>.hkbak`; later edits leave
//! that copy alone so it always holds the pre-hostkeep content. Restoring
//! copies it back and removes it.

use crate::host::HostError;
use crate::remote::{Privilege, Remote, shell_quote};

pub const BACKUP_SUFFIX: &str = ".hkbak";

pub fn backup_path(path: &str) -> String {
    format!("{path}{BACKUP_SUFFIX}")
}

pub fn has_backup(remote: &dyn Remote, path: &str) -> Result<bool, HostError> {
    remote.exists(&backup_path(path), Privilege::Root)
}

/// Copy `path` to its backup unless it is missing or already backed up
///
/// Returns true if a backup was created.
pub fn backup_file(remote: &dyn Remote, path: &str) -> Result<bool, HostError> {
    if !remote.exists(path, Privilege::Root)? {
        return Ok(false);
    }
    let backup = backup_path(path);
    if remote.exists(&backup, Privilege::Root)? {
        return Ok(false);
    }
    remote.sudo(&format!(
        "cp -p -- {} {}",
        shell_quote(path),
        shell_quote(&backup)
    ))?;
    tracing::info!("[{}] backed up {}", remote.identity(), path);
    Ok(true)
}

/// Put the backup of `path` back in place and remove it
///
/// Returns false, with a warning, when there is no backup.
pub fn restore_file(remote: &dyn Remote, path: &str) -> Result<bool, HostError> {
    let backup = backup_path(path);
    if !remote.exists(&backup, Privilege::Root)? {
        tracing::warn!("[{}] no backup of {} to restore", remote.identity(), path);
        return Ok(false);
    }
    remote.sudo(&format!(
        "cp -p -- {} {}",
        shell_quote(&backup),
        shell_quote(path)
    ))?;
    remote.sudo(&format!("rm -f -- {}", shell_quote(&backup)))?;
    tracing::info!("[{}] restored {}", remote.identity(), path);
    Ok(true)
}
