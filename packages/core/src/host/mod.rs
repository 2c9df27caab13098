//! Host management module
//!
//! - Host inventory schema and storage
//! - Host identity and canonical state namespace
//! - OpenSSH sessions implementing the remote contracts
//! - Distribution detection and per-host locking

mod distro;
mod error;
mod identity;
mod lock;
mod schema;
mod session;
mod ssh_config;
mod storage;

pub use distro::{DistroFamily, DistroInfo, detect_distro, parse_os_release, require_supported};
pub use error::HostError;
pub use identity::{DEFAULT_SSH_PORT, HostIdentity, canonical_host};
pub use lock::{HostLock, HostLockError, file_stem};
pub use schema::{HostConfig, HostsFile};
pub use session::{SshConnector, SshSession};
pub use ssh_config::{SshConfigMatch, get_ssh_config_path, query_ssh_config};
pub use storage::{load_hosts, load_hosts_from, save_hosts, save_hosts_to};
