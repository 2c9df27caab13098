//! hostkeep host show - Show details for a host

use anyhow::Result;
use clap::Args;
use console::style;
use hostkeep_core::Config;
use hostkeep_core::host::load_hosts;

use crate::targets::target_identity;

/// Arguments for host show command
#[derive(Args)]
pub struct HostShowArgs {
    /// Name of the host to show
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn cmd_host_show(args: &HostShowArgs, config: &Config, quiet: bool) -> Result<()> {
    let hosts = load_hosts()?;

    let host = hosts
        .get_host(&args.name)
        .ok_or_else(|| anyhow::anyhow!("Host '{}' not found.", args.name))?;

    if args.json || quiet {
        let json = serde_json::to_string_pretty(host)?;
        println!("{}", json);
        return Ok(());
    }

    let settled = target_identity(host, config);
    let bootstrap = settled
        .with_user(config.root_user.as_str())
        .with_port(config.default_ssh_port);

    println!("{}", style(&args.name).cyan().bold());
    println!();
    println!("  {:<15} {}", style("Hostname:").dim(), host.hostname);
    println!("  {:<15} {}", style("Manage as:").dim(), settled);
    println!("  {:<15} {}", style("Bootstrap as:").dim(), bootstrap);
    if let Some(key) = &host.identity_file {
        println!("  {:<15} {}", style("Identity:").dim(), key);
    }
    if let Some(jump) = &host.jump_host {
        println!("  {:<15} {}", style("Jump host:").dim(), jump);
    }
    if !host.roles.is_empty() {
        println!("  {:<15} {}", style("Roles:").dim(), host.roles.join(", "));
        println!(
            "  {:<15} {}",
            style("Firewall:").dim(),
            config.firewall_rules_for(&host.roles).join("; ")
        );
    }
    if let Some(desc) = &host.description {
        println!("  {:<15} {}", style("Description:").dim(), desc);
    }

    println!();
    println!(
        "  {} {}",
        style("Test connection:").dim(),
        style(format!("hostkeep host test {}", args.name)).yellow()
    );
    Ok(())
}
