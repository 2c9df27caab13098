//! hostkeep state - inspect or edit a host's recorded state
//!
//! Editing state changes what later runs believe is already done; `set` and
//! `delete` are for repairing records, not for normal operation.

use anyhow::{Result, anyhow, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Table};
use console::style;
use hostkeep_core::config::get_state_dir;
use hostkeep_core::state::LocalStateStore;
use hostkeep_core::{Config, HostConfig, StateBackend, StateStore, StateValue, load_hosts};

use crate::targets::{Selection, select_hosts, target_identity};

use super::{Session, prompter_for};

#[derive(Args)]
pub struct StateArgs {
    #[command(subcommand)]
    command: StateCommands,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List every recorded key
    Show {
        host: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one key
    Get { host: String, key: String },
    /// Record a value (`true`, `false`, `a,b,c` or text)
    Set {
        host: String,
        key: String,
        value: String,
    },
    /// Forget a key
    Delete { host: String, key: String },
}

impl StateCommands {
    fn host(&self) -> &str {
        match self {
            StateCommands::Show { host, .. }
            | StateCommands::Get { host, .. }
            | StateCommands::Set { host, .. }
            | StateCommands::Delete { host, .. } => host,
        }
    }
}

/// Run `f` against the host's store, connecting only for the remote backend
fn with_store<R>(
    config: &Config,
    host: &HostConfig,
    f: impl FnOnce(&mut dyn StateStore) -> Result<R>,
) -> Result<R> {
    match config.state_backend {
        StateBackend::Local => {
            let dir =
                get_state_dir().ok_or_else(|| anyhow!("Could not determine state directory"))?;
            let identity = target_identity(host, config);
            let mut store = LocalStateStore::open(&dir, identity.namespace())?;
            f(&mut store)
        }
        StateBackend::Remote => {
            let session = Session::open(config, host, false, prompter_for(config))?;
            session.run(|ctx| f(&mut *ctx.state))
        }
    }
}

pub fn cmd_state(args: StateArgs, config: &Config, quiet: bool) -> Result<()> {
    let inventory = load_hosts()?;
    let names = [args.command.host().to_string()];
    let hosts = select_hosts(
        &inventory,
        &Selection {
            hosts: &names,
            role: None,
            all: false,
        },
    )?;
    let host = &hosts[0];

    match args.command {
        StateCommands::Show { json, .. } => with_store(config, host, |store| {
            let entries = store.entries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                if !quiet {
                    println!("No state recorded for {}.", store.namespace());
                }
                return Ok(());
            }
            let mut table = Table::new();
            table.set_header(vec!["Key", "Value"]);
            for (key, value) in &entries {
                table.add_row(vec![Cell::new(key), Cell::new(value)]);
            }
            println!("{table}");
            Ok(())
        }),
        StateCommands::Get { key, .. } => with_store(config, host, |store| match store.get(&key)? {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => bail!("'{key}' is not recorded for {}", store.namespace()),
        }),
        StateCommands::Set { key, value, .. } => with_store(config, host, |store| {
            let value = StateValue::parse_cli(&value);
            store.set(&key, value.clone())?;
            if !quiet {
                println!(
                    "{} {} = {}",
                    style("Recorded").green(),
                    style(&key).cyan(),
                    value
                );
            }
            Ok(())
        }),
        StateCommands::Delete { key, .. } => with_store(config, host, |store| {
            if store.delete(&key)? {
                if !quiet {
                    println!("{} {}", style("Deleted").green(), style(&key).cyan());
                }
            } else if !quiet {
                println!("'{key}' was not recorded.");
            }
            Ok(())
        }),
    }
}
