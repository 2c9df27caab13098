//! Host inventory storage
//!
//! hosts.json is checked on every load and before every save, so a bad
//! entry surfaces when the inventory is read rather than halfway through a
//! setup pass. Saves keep a `.json.bak` and replace the file by rename.

use std::fs;
use std::path::Path;

use super::error::HostError;
use super::schema::{HostConfig, HostsFile};
use crate::config::paths::get_hosts_path;

/// Newest inventory layout this build understands
const INVENTORY_VERSION: u32 = 1;

/// Load the inventory from the default hosts.json
///
/// Returns an empty inventory if the file doesn't exist.
pub fn load_hosts() -> Result<HostsFile, HostError> {
    let path = get_hosts_path()
        .ok_or_else(|| HostError::LoadFailed("Could not determine hosts file path".to_string()))?;
    load_hosts_from(&path)
}

pub fn load_hosts_from(path: &Path) -> Result<HostsFile, HostError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No inventory at {}, starting empty", path.display());
            return Ok(HostsFile::new());
        }
        Err(e) => {
            return Err(HostError::LoadFailed(format!("{}: {e}", path.display())));
        }
    };

    let hosts: HostsFile = serde_json::from_str(&text)
        .map_err(|e| HostError::LoadFailed(format!("Invalid JSON in {}: {e}", path.display())))?;
    check_inventory(&hosts)?;

    tracing::debug!("Loaded {} hosts from {}", hosts.hosts.len(), path.display());
    Ok(hosts)
}

/// Save the inventory to the default hosts.json
pub fn save_hosts(hosts: &HostsFile) -> Result<(), HostError> {
    let path = get_hosts_path()
        .ok_or_else(|| HostError::SaveFailed("Could not determine hosts file path".to_string()))?;
    save_hosts_to(hosts, &path)
}

/// Refuses an inventory that would not load back
pub fn save_hosts_to(hosts: &HostsFile, path: &Path) -> Result<(), HostError> {
    check_inventory(hosts)?;
    let failed = |what: &str, e: std::io::Error| {
        HostError::SaveFailed(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| failed("creating directory for", e))?;
    }
    if path.exists() {
        fs::copy(path, path.with_extension("json.bak")).map_err(|e| failed("backing up", e))?;
    }

    let json = serde_json::to_string_pretty(hosts)
        .map_err(|e| HostError::SaveFailed(format!("Failed to serialize: {e}")))?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, json).map_err(|e| failed("writing", e))?;
    fs::rename(&staged, path).map_err(|e| failed("replacing", e))?;

    tracing::debug!("Saved {} hosts to {}", hosts.hosts.len(), path.display());
    Ok(())
}

/// Every problem in the inventory, one `name: problem` per entry
fn check_inventory(hosts: &HostsFile) -> Result<(), HostError> {
    if hosts.version > INVENTORY_VERSION {
        return Err(HostError::InvalidConfig(format!(
            "inventory version {} is newer than this hostkeep understands ({INVENTORY_VERSION})",
            hosts.version
        )));
    }

    let problems: Vec<String> = hosts
        .hosts
        .iter()
        .filter_map(|(name, host)| entry_problem(host).map(|problem| format!("{name}: {problem}")))
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(HostError::InvalidConfig(problems.join("; ")))
    }
}

fn entry_problem(host: &HostConfig) -> Option<&'static str> {
    if host.hostname.is_empty() {
        Some("hostname is empty")
    } else if host.hostname.contains('@') || host.hostname.contains(char::is_whitespace) {
        Some("hostname must be a bare host; put the account in `user`")
    } else if host.user.is_empty() {
        Some("user is empty")
    } else if host.port == Some(0) {
        Some("port 0 is not a valid SSH port")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let dir = TempDir::new().unwrap();
        let hosts = load_hosts_from(&dir.path().join("hosts.json")).unwrap();
        assert!(hosts.hosts.is_empty());
    }

    #[test]
    fn test_save_keeps_backup_and_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("hosts.json");

        let mut hosts = HostsFile::new();
        hosts.add_host("web-1", HostConfig::new("web1.example.com").with_role("web"));
        save_hosts_to(&hosts, &path).unwrap();
        assert!(!path.with_extension("json.bak").exists());

        hosts.add_host("db-1", HostConfig::new("db1.example.com").with_port(10022));
        save_hosts_to(&hosts, &path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        assert_eq!(load_hosts_from(&path).unwrap(), hosts);
        let backup = load_hosts_from(&path.with_extension("json.bak")).unwrap();
        assert!(!backup.has_host("db-1"));
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_hosts_from(&path), Err(HostError::LoadFailed(_))));
    }

    #[test]
    fn test_bad_entries_are_named_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(
            &path,
            r#"{"hosts": {
                "ok": {"hostname": "10.0.0.1", "user": "deploy"},
                "adhoc": {"hostname": "root@10.0.0.2", "user": "deploy"},
                "zero": {"hostname": "10.0.0.3", "user": "deploy", "port": 0}
            }}"#,
        )
        .unwrap();

        let Err(HostError::InvalidConfig(reason)) = load_hosts_from(&path) else {
            panic!("bad entries should be rejected");
        };
        assert!(reason.contains("adhoc: hostname must be a bare host"));
        assert!(reason.contains("zero: port 0"));
        assert!(!reason.contains("ok:"));
    }

    #[test]
    fn test_invalid_inventory_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        let mut hosts = HostsFile::new();
        hosts.add_host("web-1", HostConfig::new("web1.example.com"));
        save_hosts_to(&hosts, &path).unwrap();

        hosts.add_host("blank", HostConfig::new(""));
        assert!(matches!(
            save_hosts_to(&hosts, &path),
            Err(HostError::InvalidConfig(_))
        ));
        assert!(!load_hosts_from(&path).unwrap().has_host("blank"));
        assert!(!path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_newer_inventory_version_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, r#"{"version": 2, "hosts": {}}"#).unwrap();
        assert!(matches!(load_hosts_from(&path), Err(HostError::InvalidConfig(_))));
    }
}
