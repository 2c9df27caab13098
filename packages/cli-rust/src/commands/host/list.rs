//! hostkeep host list - List inventory hosts

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Table};
use console::style;
use hostkeep_core::Config;
use hostkeep_core::config::get_hosts_path;
use hostkeep_core::host::load_hosts;

use crate::targets::target_identity;

/// Arguments for host list command
#[derive(Args)]
pub struct HostListArgs {
    /// Filter by role
    #[arg(short, long)]
    pub role: Option<String>,

    /// Show only host names (for scripting)
    #[arg(long)]
    pub names_only: bool,
}

pub fn cmd_host_list(args: &HostListArgs, config: &Config, quiet: bool) -> Result<()> {
    let hosts = load_hosts()?;

    if hosts.hosts.is_empty() {
        if !quiet && !args.names_only {
            println!("No hosts configured.");
            println!();
            println!(
                "  {} {}",
                style("Add one with:").dim(),
                style("hostkeep host add <name> <hostname>").yellow()
            );
        }
        return Ok(());
    }

    let filtered: Vec<_> = hosts
        .hosts
        .iter()
        .filter(|(_, host)| args.role.as_ref().is_none_or(|r| host.has_role(r)))
        .collect();

    if filtered.is_empty() {
        if !quiet && !args.names_only {
            println!(
                "No hosts found with role '{}'.",
                args.role.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }

    // Names only mode (for scripting)
    if args.names_only || quiet {
        for (name, _) in &filtered {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Name", "Manage as", "Roles", "Description"]);
    for (name, host) in filtered {
        let roles = if host.roles.is_empty() {
            "-".to_string()
        } else {
            host.roles.join(", ")
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(target_identity(host, config)),
            Cell::new(roles),
            Cell::new(host.description.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");

    if let Some(path) = get_hosts_path() {
        println!();
        println!(
            "  {} {}",
            style("Inventory:").dim(),
            style(path.display()).dim()
        );
    }
    Ok(())
}
