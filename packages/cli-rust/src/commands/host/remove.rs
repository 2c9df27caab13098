//! hostkeep host remove - Remove a host from the inventory
//!
//! Only the inventory entry goes; the host itself and its state record are
//! left alone.

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use hostkeep_core::host::{load_hosts, save_hosts};

/// Arguments for host remove command
#[derive(Args)]
pub struct HostRemoveArgs {
    /// Name of the host to remove
    pub name: String,
}

pub fn cmd_host_remove(args: &HostRemoveArgs, quiet: bool) -> Result<()> {
    let mut hosts = load_hosts()?;
    let Some(removed) = hosts.remove_host(&args.name) else {
        bail!("Host '{}' not found.", args.name);
    };
    save_hosts(&hosts)?;

    if !quiet {
        println!(
            "{} Host '{}' removed ({}).",
            style("Removed:").green(),
            style(&args.name).cyan(),
            removed.hostname
        );
    }
    Ok(())
}
