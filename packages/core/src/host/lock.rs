//! Per-host PID lock
//!
//! Only one hostkeep process may reconcile a given host at a time, since two
//! writers would race on its state record. A lock file left behind by a
//! crashed process is detected as stale and replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while taking a host lock
#[derive(Error, Debug)]
pub enum HostLockError {
    /// Another process is working on this host
    #[error("{host} is locked by another hostkeep process (PID: {pid})")]
    Busy { host: String, pid: u32 },

    #[error("Failed to create lock directory: {0}")]
    CreateDirFailed(String),

    #[error("Failed to manage lock file {path}: {reason}")]
    LockFailed { path: String, reason: String },
}

/// Guard holding the lock for one host namespace
///
/// The lock file is removed on drop.
#[derive(Debug)]
pub struct HostLock {
    path: PathBuf,
}

impl HostLock {
    /// Take the lock for `namespace` in `lock_dir`
    pub fn acquire(lock_dir: &Path, namespace: &str) -> Result<Self, HostLockError> {
        fs::create_dir_all(lock_dir)
            .map_err(|e| HostLockError::CreateDirFailed(e.to_string()))?;

        let path = lock_dir.join(format!("{}.pid", file_stem(namespace)));
        let shown = path.display().to_string();
        let failed = |e: std::io::Error| HostLockError::LockFailed {
            path: shown.clone(),
            reason: e.to_string(),
        };

        // two attempts: the second follows removal of a stale file
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(failed)?;
                    tracing::debug!("Acquired host lock: {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let contents = fs::read_to_string(&path).map_err(failed)?;
                    if let Ok(pid) = contents.trim().parse::<u32>() {
                        if is_process_running(pid) {
                            return Err(HostLockError::Busy {
                                host: namespace.to_string(),
                                pid,
                            });
                        }
                        tracing::info!("Removing stale host lock (PID {} not running)", pid);
                    }
                    fs::remove_file(&path).map_err(failed)?;
                }
                Err(e) => return Err(failed(e)),
            }
        }

        Err(HostLockError::LockFailed {
            path: shown,
            reason: "lock file keeps reappearing".to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove host lock on drop: {}", e);
        } else {
            tracing::debug!("Released host lock: {}", self.path.display());
        }
    }
}

/// File-name-safe form of a host namespace
pub fn file_stem(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Check if a process with the given PID is currently running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // signal 0 checks existence without delivering anything
        match std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .output()
        {
            Ok(output) => output.status.success(),
            Err(_) => Path::new(&format!("/proc/{}", pid)).exists(),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
