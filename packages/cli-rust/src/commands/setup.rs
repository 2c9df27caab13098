//! Setup command implementation
//!
//! Provisions every selected host: bootstrap when needed, then the settled
//! steps and hooks. Hosts run one after another, or concurrently with
//! `--parallel` when nothing needs to be asked.

use anyhow::{Result, anyhow, bail};
use clap::Args;
use comfy_table::{Cell, Color, Table};
use console::style;
use hostkeep_core::config::get_lock_dir;
use hostkeep_core::host::HostLock;
use hostkeep_core::{
    Config, HookRegistry, HostConfig, NodeReport, NodeSetup, Prompter, StepOutcome, Templates,
    Unattended, load_hosts,
};
use tokio::task::JoinSet;

use crate::output::{HostProgress, outcome_style};
use crate::prompt::TerminalPrompter;
use crate::targets::{Selection, ask_sudo_password, connector_for, select_hosts, target_identity};

/// Arguments for the setup command
#[derive(Args)]
pub struct SetupArgs {
    /// Inventory names or `[user@]host[:port]` addresses
    pub hosts: Vec<String>,

    /// Every inventory host with this role
    #[arg(short, long)]
    pub role: Option<String>,

    /// Every inventory host
    #[arg(long)]
    pub all: bool,

    /// Provision hosts concurrently (unattended only)
    #[arg(long)]
    pub parallel: bool,

    /// Never prompt; the config flags decide every confirmation
    #[arg(long, short)]
    pub yes: bool,
}

/// Provision one host end to end
///
/// Holds the host's lock for the whole pass.
pub fn provision(config: &Config, host: &HostConfig, prompter: &dyn Prompter) -> Result<NodeReport> {
    let lock_dir = get_lock_dir().ok_or_else(|| anyhow!("Could not determine lock directory"))?;
    let target = target_identity(host, config);
    let _lock = HostLock::acquire(&lock_dir, target.namespace())?;

    let templates = Templates::for_config(config)?;
    let hooks = HookRegistry::from_config(&config.hooks);
    let connector = connector_for(host, config);
    let setup = NodeSetup {
        config,
        host,
        connector: &connector,
        prompter,
        templates: &templates,
        hooks: &hooks,
        state_dir: None,
    };
    Ok(setup.run())
}

/// Run the setup command
pub async fn cmd_setup(args: &SetupArgs, mut config: Config, quiet: bool) -> Result<()> {
    if args.yes {
        config.interactive = false;
    }
    if args.parallel && config.interactive {
        bail!(
            "--parallel cannot prompt for confirmations.\n\n\
            Pass --yes, or set \"interactive\": false in the config file."
        );
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

    let results = if args.parallel {
        run_parallel(&config, hosts, quiet).await?
    } else {
        run_sequential(&config, &hosts, quiet)?
    };

    if !quiet {
        print_summary(&results);
    }

    let failures = results
        .iter()
        .filter(|(_, result)| !matches!(result, Ok(report) if report.is_success()))
        .count();
    if failures > 0 {
        bail!("{failures} of {} hosts did not complete cleanly", results.len());
    }
    Ok(())
}

type HostResult = (String, Result<NodeReport>);

fn run_sequential(config: &Config, hosts: &[HostConfig], quiet: bool) -> Result<Vec<HostResult>> {
    // progress lines would fight with prompts for the terminal
    let progress = HostProgress::new(
        hosts.iter().map(|h| h.hostname.as_str()),
        quiet || config.interactive,
    );
    let mut results = Vec::new();
    for host in hosts {
        let mut config = config.clone();
        let prompter: &dyn Prompter = if config.interactive {
            &TerminalPrompter
        } else {
            &Unattended
        };
        let identity = target_identity(host, &config);
        ask_sudo_password(&mut config, &identity, prompter)?;

        let line = progress.host(&host.hostname, "provisioning");
        let result = provision(&config, host, prompter);
        line.finish(&result);
        results.push((host.hostname.clone(), result));
    }
    Ok(results)
}

async fn run_parallel(
    config: &Config,
    hosts: Vec<HostConfig>,
    quiet: bool,
) -> Result<Vec<HostResult>> {
    let progress = HostProgress::new(hosts.iter().map(|h| h.hostname.as_str()), quiet);

    let mut tasks = JoinSet::new();
    for (index, host) in hosts.into_iter().enumerate() {
        let config = config.clone();
        let line = progress.host(&host.hostname, "provisioning");
        tasks.spawn_blocking(move || {
            let result = provision(&config, &host, &Unattended);
            line.finish(&result);
            (index, host.hostname, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, hostname, result) = joined.map_err(|e| anyhow!("host task failed: {e}"))?;
        results.push((index, (hostname, result)));
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, result)| result).collect())
}

fn print_summary(results: &[HostResult]) {
    let mut table = Table::new();
    table.set_header(vec!["Host", "Result", "Applied", "Tolerated", "Hooks"]);

    for (hostname, result) in results {
        match result {
            Ok(report) => {
                let (label, color) = match (&report.aborted, report.is_success()) {
                    (Some(_), _) => ("aborted", Color::Red),
                    (None, true) => ("ok", Color::Green),
                    (None, false) => ("partial", Color::Yellow),
                };
                table.add_row(vec![
                    Cell::new(hostname),
                    Cell::new(label).fg(color),
                    Cell::new(report.applied()),
                    Cell::new(report.tolerated.len()),
                    Cell::new(report.hooks.ran.len()),
                ]);
            }
            Err(_) => {
                table.add_row(vec![
                    Cell::new(hostname),
                    Cell::new("error").fg(Color::Red),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                ]);
            }
        }
    }

    println!();
    println!("{table}");

    for (hostname, result) in results {
        match result {
            Ok(report) => print_problems(hostname, report),
            Err(e) => {
                println!();
                println!("{} {}", style(hostname).cyan().bold(), style("error").red());
                println!("  {e:#}");
            }
        }
    }
}

fn print_problems(hostname: &str, report: &NodeReport) {
    let failed: Vec<_> = report.failed().collect();
    let declined: Vec<_> = report
        .steps
        .iter()
        .filter_map(|s| s.result.as_ref().ok().map(|outcome| (s.name, outcome)))
        .filter(|(_, outcome)| !matches!(outcome, StepOutcome::Applied | StepOutcome::NoChange))
        .collect();
    if failed.is_empty()
        && declined.is_empty()
        && report.aborted.is_none()
        && report.tolerated.is_empty()
        && !report.hooks.has_problems()
    {
        return;
    }

    println!();
    println!("{}", style(hostname).cyan().bold());
    if let Some(reason) = &report.aborted {
        println!("  {} {}", style("aborted:").red(), reason);
    }
    for record in failed {
        if let Err(reason) = &record.result {
            println!("  {} {}: {}", style("failed").red(), record.name, reason);
        }
    }
    for (name, outcome) in declined {
        println!("  {} {}", style(name).dim(), outcome_style(outcome));
    }
    for tolerated in &report.tolerated {
        println!(
            "  {} `{}` exited {}",
            style("tolerated").yellow(),
            tolerated.command,
            tolerated.status
        );
    }
    for failure in report.hooks.load_failed.iter().chain(&report.hooks.failed) {
        println!(
            "  {} {} {}: {}",
            style("hook").yellow(),
            failure.component,
            failure.hook,
            failure.reason
        );
    }
}
