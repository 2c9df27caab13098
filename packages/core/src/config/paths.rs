//! XDG-style path resolution for hostkeep
//!
//! - Linux/macOS: ~/.config/hostkeep/ and ~/.local/share/hostkeep/
//! - Windows: %APPDATA%\hostkeep\ and %LOCALAPPDATA%\hostkeep\

use std::path::PathBuf;

const APP_DIR: &str = "hostkeep";

/// Get the configuration directory path
///
/// Returns the directory where config.json and hosts.json live:
/// - Linux/macOS: `~/.config/hostkeep/` (XDG-style, not ~/Library)
/// - Windows: `%APPDATA%\hostkeep\`
pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join(APP_DIR))
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .map(|d| d.join(APP_DIR))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Get the data directory path
///
/// Holds local state records, per-host lock files and SSH control sockets:
/// - Linux/macOS: `~/.local/share/hostkeep/`
/// - Windows: `%LOCALAPPDATA%\hostkeep\`
pub fn get_data_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new().map(|dirs| {
            dirs.home_dir()
                .join(".local")
                .join("share")
                .join(APP_DIR)
        })
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .map(|d| d.join(APP_DIR))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Returns: `{config_dir}/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config.json"))
}

/// Returns: `{config_dir}/hosts.json`
pub fn get_hosts_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("hosts.json"))
}

/// Directory holding one JSON record per host for the local state backend
///
/// Returns: `{data_dir}/state`
pub fn get_state_dir() -> Option<PathBuf> {
    get_data_dir().map(|d| d.join("state"))
}

/// Directory holding the per-host PID lock files
///
/// Returns: `{data_dir}/locks`
pub fn get_lock_dir() -> Option<PathBuf> {
    get_data_dir().map(|d| d.join("locks"))
}

/// Directory for OpenSSH `ControlPath` sockets
///
/// Returns: `{data_dir}/mux`
pub fn get_control_dir() -> Option<PathBuf> {
    get_data_dir().map(|d| d.join("mux"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_exists() {
        let dir = get_config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("hostkeep"));
    }

    #[test]
    fn test_data_dir_exists() {
        let dir = get_data_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("hostkeep"));
    }

    #[test]
    fn test_config_and_hosts_live_side_by_side() {
        let config = get_config_path().unwrap();
        let hosts = get_hosts_path().unwrap();
        assert!(config.ends_with("config.json"));
        assert!(hosts.ends_with("hosts.json"));
        assert_eq!(config.parent(), hosts.parent());
    }

    #[test]
    fn test_runtime_dirs_are_under_data_dir() {
        let data = get_data_dir().unwrap();
        for dir in [get_state_dir(), get_lock_dir(), get_control_dir()] {
            let dir = dir.unwrap();
            assert!(dir.starts_with(&data));
        }
        assert!(get_state_dir().unwrap().ends_with("state"));
        assert!(get_lock_dir().unwrap().ends_with("locks"));
    }
}
