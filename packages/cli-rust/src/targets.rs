//! Host selection and session setup shared by the commands

use anyhow::{Context, Result, bail};
use hostkeep_core::config::get_control_dir;
use hostkeep_core::host::{DEFAULT_SSH_PORT, require_supported};
use hostkeep_core::{
    Config, Connector, HostConfig, HostIdentity, HostsFile, Prompter, Remote, SshConnector,
};

/// How the operator picked hosts on the command line
pub struct Selection<'a> {
    pub hosts: &'a [String],
    pub role: Option<&'a str>,
    pub all: bool,
}

/// Resolve names, ad-hoc `[user@]host[:port]` addresses, roles, and `--all`
///
/// Inventory names win over addresses. The result keeps selection order
/// with duplicates removed.
pub fn select_hosts(inventory: &HostsFile, selection: &Selection<'_>) -> Result<Vec<HostConfig>> {
    let mut selected: Vec<HostConfig> = Vec::new();
    let mut push = |host: HostConfig| {
        if !selected.iter().any(|h| h.hostname == host.hostname) {
            selected.push(host);
        }
    };

    for name in selection.hosts {
        match inventory.get_host(name) {
            Some(host) => push(host.clone()),
            None => {
                let identity =
                    HostIdentity::parse(name, &HostConfig::default().user, DEFAULT_SSH_PORT)?;
                push(HostConfig::from_identity(&identity));
            }
        }
    }
    if let Some(role) = selection.role {
        let mut matched = false;
        for (_, host) in inventory.hosts_with_role(role) {
            push(host.clone());
            matched = true;
        }
        if !matched {
            bail!("No hosts in the inventory have role '{role}'.");
        }
    }
    if selection.all {
        for host in inventory.hosts.values() {
            push(host.clone());
        }
    }

    if selected.is_empty() {
        bail!("No hosts given. Name hosts, or use --role or --all.");
    }
    Ok(selected)
}

/// Connector for one host with multiplexed control sockets
pub fn connector_for(host: &HostConfig, config: &Config) -> SshConnector {
    let connector = SshConnector::new(host.clone()).interactive(config.interactive);
    match get_control_dir() {
        Some(dir) => connector.with_control_dir(&dir),
        None => connector,
    }
}

/// Settled identity for `host`, honoring `host_user`
pub fn target_identity(host: &HostConfig, config: &Config) -> HostIdentity {
    let identity = host.identity(config.ssh_port);
    match &config.host_user {
        Some(user) => identity.with_user(user.as_str()),
        None => identity,
    }
}

/// Connect and refuse anything but the Debian family
pub fn open_session(
    connector: &dyn Connector,
    identity: &HostIdentity,
    config: &Config,
) -> Result<Box<dyn Remote>> {
    let password = if identity.user == config.root_user {
        None
    } else {
        config.host_password.as_deref()
    };
    let session = connector.connect(identity, password)?;
    require_supported(session.as_ref())
        .with_context(|| format!("Cannot manage {identity}"))?;
    Ok(session)
}

/// Ask once for the sudo password of the settled account, if one is needed
pub fn ask_sudo_password(config: &mut Config, identity: &HostIdentity, prompter: &dyn Prompter) -> Result<()> {
    if !config.interactive || config.host_password.is_some() || identity.user == config.root_user {
        return Ok(());
    }
    let password = prompter.password(&format!(
        "Password for {}@{} (blank for key-only sudo)",
        identity.user, identity.host
    ))?;
    if !password.is_empty() {
        config.host_password = Some(password);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> HostsFile {
        let mut hosts = HostsFile::new();
        hosts.add_host("web1", HostConfig::new("web1.example.com").with_role("web"));
        hosts.add_host("web2", HostConfig::new("web2.example.com").with_role("web"));
        hosts.add_host("db", HostConfig::new("db.example.com").with_role("db"));
        hosts
    }

    #[test]
    fn test_select_by_name_and_address() {
        let names = vec!["db".to_string(), "ops@10.0.0.5:2222".to_string()];
        let selected = select_hosts(
            &inventory(),
            &Selection {
                hosts: &names,
                role: None,
                all: false,
            },
        )
        .unwrap();

        assert_eq!(selected[0].hostname, "db.example.com");
        assert_eq!(selected[1].hostname, "10.0.0.5");
        assert_eq!(selected[1].user, "ops");
        assert_eq!(selected[1].port, Some(2222));
    }

    #[test]
    fn test_select_by_role_without_duplicates() {
        let names = vec!["web2".to_string()];
        let selected = select_hosts(
            &inventory(),
            &Selection {
                hosts: &names,
                role: Some("web"),
                all: false,
            },
        )
        .unwrap();
        let hostnames: Vec<&str> = selected.iter().map(|h| h.hostname.as_str()).collect();
        assert_eq!(hostnames, vec!["web2.example.com", "web1.example.com"]);
    }

    #[test]
    fn test_select_unknown_role_fails() {
        let err = select_hosts(
            &inventory(),
            &Selection {
                hosts: &[],
                role: Some("cache"),
                all: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache"));
    }

    #[test]
    fn test_select_nothing_fails() {
        assert!(
            select_hosts(
                &inventory(),
                &Selection {
                    hosts: &[],
                    role: None,
                    all: false,
                },
            )
            .is_err()
        );
    }

    #[test]
    fn test_target_identity_prefers_host_user() {
        let host = HostConfig::new("web1.example.com").with_user("deploy");
        let config = Config {
            host_user: Some("admin".to_string()),
            ..Config::default()
        };
        let identity = target_identity(&host, &config);
        assert_eq!(identity.to_string(), "admin@web1.example.com:10022");
    }
}
