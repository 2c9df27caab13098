//! hostkeep host test - Test connection to a host
//!
//! Tries the settled identity first and falls back to the bootstrap
//! identity, which tells a provisioned host from a fresh one.

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use hostkeep_core::Config;
use hostkeep_core::host::{detect_distro, load_hosts};

use crate::output::HostProgress;
use crate::targets::{connector_for, open_session, target_identity};

/// Arguments for host test command
#[derive(Args)]
pub struct HostTestArgs {
    /// Name of the host to test
    pub name: String,
}

pub fn cmd_host_test(args: &HostTestArgs, config: &Config, quiet: bool) -> Result<()> {
    let hosts = load_hosts()?;
    let host = hosts
        .get_host(&args.name)
        .ok_or_else(|| anyhow::anyhow!("Host '{}' not found.", args.name))?;

    let connector = connector_for(host, config);
    let settled = target_identity(host, config);
    let bootstrap = settled
        .with_user(config.root_user.as_str())
        .with_port(config.default_ssh_port);

    let progress = HostProgress::new([args.name.as_str()], quiet);
    let line = progress.host(&args.name, &format!("connecting to {settled}"));
    let (identity, remote) = match open_session(&connector, &settled, config) {
        Ok(remote) => (settled, remote),
        Err(settled_err) => {
            tracing::debug!("{settled}: {settled_err:#}");
            line.set_message(&format!("trying {bootstrap}"));
            match open_session(&connector, &bootstrap, config) {
                Ok(remote) => (bootstrap, remote),
                Err(e) => {
                    line.fail("connection failed");
                    if !quiet {
                        println!();
                        println!("  {settled_err:#}");
                        println!("  {e:#}");
                        println!();
                        println!("{}", style("Troubleshooting:").yellow());
                        println!("  1. Verify SSH access: ssh -p {} {}", settled.port, settled.destination());
                        println!("  2. For a fresh host: ssh -p {} {}", bootstrap.port, bootstrap.destination());
                        println!("  3. Ensure your key is loaded: ssh-add");
                    }
                    bail!("Connection test failed");
                }
            }
        }
    };

    let distro = detect_distro(remote.as_ref())?;
    line.success(&format!("connected as {identity}"));
    if !quiet {
        println!();
        println!("  {:<15} {}", style("Host:").dim(), args.name);
        println!("  {:<15} {}", style("SSH:").dim(), identity);
        println!("  {:<15} {}", style("System:").dim(), distro.pretty_name);
        if identity.user == config.root_user && identity.port == config.default_ssh_port {
            println!(
                "  {:<15} {}",
                style("Status:").dim(),
                style("not yet set up (reachable as the bootstrap account)").yellow()
            );
        }
    }
    Ok(())
}
