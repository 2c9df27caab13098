//! hostkeep rollback - undo a step from the backups it left

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use hostkeep_core::{Config, RollbackTarget, load_hosts};

use crate::output::outcome_style;
use crate::targets::{Selection, select_hosts};

use super::{Session, prompter_for};

/// Arguments for the rollback command
#[derive(Args)]
pub struct RollbackArgs {
    /// What to undo
    #[arg(value_enum)]
    pub target: RollbackTarget,

    /// Inventory name or `[user@]host[:port]` address
    pub host: String,
}

pub fn cmd_rollback(args: &RollbackArgs, config: Config, quiet: bool) -> Result<()> {
    let inventory = load_hosts()?;
    let names = [args.host.clone()];
    let hosts = select_hosts(
        &inventory,
        &Selection {
            hosts: &names,
            role: None,
            all: false,
        },
    )?;

    let name = args
        .target
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default();
    let prompter = prompter_for(&config);
    for host in &hosts {
        let session = Session::open(&config, host, false, prompter)?;
        let outcome = session.run(|ctx| Ok(args.target.rollback(ctx)?))?;
        if !quiet {
            println!(
                "{} rollback {}: {}",
                style(&host.hostname).cyan(),
                name,
                outcome_style(&outcome)
            );
        }
    }
    Ok(())
}
