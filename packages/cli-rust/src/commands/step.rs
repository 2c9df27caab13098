//! hostkeep step - run a single step against hosts

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use hostkeep_core::{Config, StepKind, load_hosts};

use crate::output::outcome_style;
use crate::targets::{Selection, select_hosts};

use super::{Session, prompter_for};

/// Arguments for the step command
#[derive(Args)]
pub struct StepArgs {
    /// Step to run
    #[arg(value_enum)]
    pub step: StepKind,

    /// Inventory names or `[user@]host[:port]` addresses
    pub hosts: Vec<String>,

    /// Every inventory host with this role
    #[arg(short, long)]
    pub role: Option<String>,

    /// Every inventory host
    #[arg(long)]
    pub all: bool,

    /// Never prompt; the config flags decide every confirmation
    #[arg(long, short)]
    pub yes: bool,
}

pub fn cmd_step(args: &StepArgs, mut config: Config, quiet: bool) -> Result<()> {
    if args.yes {
        config.interactive = false;
    }
    let inventory = load_hosts()?;
    let hosts = select_hosts(
        &inventory,
        &Selection {
            hosts: &args.hosts,
            role: args.role.as_deref(),
            all: args.all,
        },
    )?;

    let step = args.step.step();
    let prompter = prompter_for(&config);
    let mut failures = 0;
    for host in &hosts {
        let result = Session::open(&config, host, args.step.is_bootstrap(), prompter).and_then(
            |session| {
                session.run(|ctx| {
                    let outcome = step.apply(ctx)?;
                    Ok((outcome, ctx.tolerated.len()))
                })
            },
        );
        match result {
            Ok((outcome, tolerated)) => {
                if !quiet {
                    println!(
                        "{} {}: {}",
                        style(&host.hostname).cyan(),
                        step.name(),
                        outcome_style(&outcome)
                    );
                    if tolerated > 0 {
                        println!("  {} {} tolerated failures", style("!").yellow(), tolerated);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!(
                    "{} {} {}: {e:#}",
                    style("Error:").red().bold(),
                    host.hostname,
                    step.name()
                );
            }
        }
    }

    if failures > 0 {
        bail!("{} failed on {failures} of {} hosts", step.name(), hosts.len());
    }
    Ok(())
}
