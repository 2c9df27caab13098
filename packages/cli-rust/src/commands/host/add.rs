//! hostkeep host add - Add a host to the inventory

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use hostkeep_core::host::{load_hosts, query_ssh_config, save_hosts};
use hostkeep_core::HostConfig;

/// Arguments for host add command
#[derive(Args)]
pub struct HostAddArgs {
    /// Name to identify this host (e.g., "web-1", "db")
    pub name: String,

    /// SSH hostname or IP address
    pub hostname: String,

    /// Account to create and manage the host as (default: from SSH config or current user)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Settled SSH port (default: the configured ssh_port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to SSH identity file (private key)
    #[arg(short, long)]
    pub identity_file: Option<String>,

    /// Jump host for ProxyJump (user@host:port format)
    #[arg(short = 'J', long)]
    pub jump_host: Option<String>,

    /// Role selecting firewall rules (can be specified multiple times)
    #[arg(short, long)]
    pub role: Vec<String>,

    /// Description for this host
    #[arg(short, long)]
    pub description: Option<String>,

    /// Overwrite if host already exists
    #[arg(long)]
    pub force: bool,
}

/// Build the inventory entry, preferring explicit args over ~/.ssh/config
fn build_entry(args: &HostAddArgs, quiet: bool) -> HostConfig {
    let mut config = HostConfig::new(&args.hostname);
    if let Some(user) = &args.user {
        config = config.with_user(user);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(key) = &args.identity_file {
        config = config.with_identity_file(key);
    }
    if let Some(jump) = &args.jump_host {
        config = config.with_jump_host(jump);
    }
    for role in &args.role {
        config = config.with_role(role);
    }
    if let Some(desc) = &args.description {
        config = config.with_description(desc);
    }

    match query_ssh_config(&args.hostname) {
        Ok(found) if found.has_settings() => {
            if !quiet {
                println!(
                    "{} Found in ~/.ssh/config: {}",
                    style("SSH Config:").cyan(),
                    found.display_settings()
                );
            }
            found.apply_to(&mut config, args.user.is_some());
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Skipping ~/.ssh/config: {}", e),
    }
    config
}

pub fn cmd_host_add(args: &HostAddArgs, quiet: bool) -> Result<()> {
    let mut hosts = load_hosts()?;

    if hosts.has_host(&args.name) && !args.force {
        bail!(
            "Host '{}' already exists. Use --force to overwrite, or choose a different name.",
            args.name
        );
    }

    let config = build_entry(args, quiet);
    let is_overwrite = hosts.has_host(&args.name);
    hosts.add_host(&args.name, config);
    save_hosts(&hosts)?;

    if !quiet {
        let (label, verb) = if is_overwrite {
            (style("Updated:").yellow(), "updated")
        } else {
            (style("Added:").green(), "added")
        };
        println!(
            "{} Host '{}' {} ({}).",
            label,
            style(&args.name).cyan(),
            verb,
            args.hostname
        );
        println!(
            "  {} {}",
            style("Provision it with:").dim(),
            style(format!("hostkeep setup {}", args.name)).yellow()
        );
    }
    Ok(())
}
