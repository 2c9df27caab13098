//! Remote distribution detection
//!
//! Reconciliation drives apt, dpkg and ufw, so only the Debian family is
//! supported. Detection is also the reachability check used to decide
//! whether a host has already been moved to its settled port.

use super::error::HostError;
use crate::remote::Executor;

/// Linux distribution family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistroFamily {
    /// Debian, Ubuntu, and derivatives (apt-based)
    Debian,
    /// RHEL, CentOS, Fedora, Amazon Linux (dnf/yum-based)
    RedHat,
    Alpine,
    Arch,
    Suse,
    Unknown(String),
}

impl std::fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistroFamily::Debian => write!(f, "Debian/Ubuntu"),
            DistroFamily::RedHat => write!(f, "RHEL/Fedora"),
            DistroFamily::Alpine => write!(f, "Alpine"),
            DistroFamily::Arch => write!(f, "Arch"),
            DistroFamily::Suse => write!(f, "SUSE"),
            DistroFamily::Unknown(id) => write!(f, "Unknown ({})", id),
        }
    }
}

/// Detected distribution information
#[derive(Debug, Clone, PartialEq)]
pub struct DistroInfo {
    pub family: DistroFamily,
    /// Distribution ID (e.g., "ubuntu", "debian")
    pub id: String,
    /// Pretty name (e.g., "Ubuntu 22.04.3 LTS")
    pub pretty_name: String,
    pub version_id: Option<String>,
    /// Release codename (e.g., "jammy")
    pub codename: Option<String>,
}

impl DistroInfo {
    pub fn is_supported(&self) -> bool {
        self.family == DistroFamily::Debian
    }
}

/// Detect the distribution of the connected host from /etc/os-release
pub fn detect_distro(remote: &dyn Executor) -> Result<DistroInfo, HostError> {
    let output = remote.run("cat /etc/os-release")?;
    parse_os_release(&output.stdout).ok_or_else(|| HostError::UnsupportedDistro {
        host: remote.identity().to_string(),
        distro: "no ID in /etc/os-release".to_string(),
    })
}

/// Detect the distribution and refuse anything outside the Debian family
pub fn require_supported(remote: &dyn Executor) -> Result<DistroInfo, HostError> {
    let info = detect_distro(remote)?;
    if !info.is_supported() {
        return Err(HostError::UnsupportedDistro {
            host: remote.identity().to_string(),
            distro: info.pretty_name.clone(),
        });
    }
    tracing::debug!("[{}] {}", remote.identity(), info.pretty_name);
    Ok(info)
}

/// Parse /etc/os-release content; `None` if it carries no ID
pub fn parse_os_release(content: &str) -> Option<DistroInfo> {
    let mut id = String::new();
    let mut id_like = String::new();
    let mut pretty_name = String::new();
    let mut version_id = None;
    let mut codename = None;

    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim_matches('"');
            match key.trim() {
                "ID" => id = value.to_lowercase(),
                "ID_LIKE" => id_like = value.to_lowercase(),
                "PRETTY_NAME" => pretty_name = value.to_string(),
                "VERSION_ID" => version_id = Some(value.to_string()),
                "VERSION_CODENAME" => codename = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if id.is_empty() {
        return None;
    }

    let family = match id.as_str() {
        "ubuntu" | "debian" | "linuxmint" | "pop" | "elementary" | "raspbian" => {
            DistroFamily::Debian
        }
        "amzn" | "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => {
            DistroFamily::RedHat
        }
        "alpine" => DistroFamily::Alpine,
        "arch" | "manjaro" | "endeavouros" => DistroFamily::Arch,
        "opensuse" | "sles" | "opensuse-leap" | "opensuse-tumbleweed" => DistroFamily::Suse,
        _ => {
            if id_like.contains("debian") || id_like.contains("ubuntu") {
                DistroFamily::Debian
            } else if id_like.contains("rhel") || id_like.contains("fedora") {
                DistroFamily::RedHat
            } else if id_like.contains("arch") {
                DistroFamily::Arch
            } else if id_like.contains("suse") {
                DistroFamily::Suse
            } else {
                DistroFamily::Unknown(id.clone())
            }
        }
    };

    if pretty_name.is_empty() {
        pretty_name = id.clone();
    }

    Some(DistroInfo {
        family,
        id,
        pretty_name,
        version_id,
        codename,
    })
}
