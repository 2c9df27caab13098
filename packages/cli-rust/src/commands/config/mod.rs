//! Config subcommand implementations
//!
//! Provides `hostkeep config` subcommands for viewing configuration.

mod show;

use anyhow::Result;
use clap::{Args, Subcommand};
use hostkeep_core::Config;
use hostkeep_core::config::get_config_path;

pub use show::cmd_config_show;

/// Configuration command arguments
#[derive(Args)]
pub struct ConfigArgs {
    /// Output as JSON instead of table format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Show current configuration
    Show {
        /// Output as JSON instead of table format
        #[arg(long)]
        json: bool,
    },
    /// Print the config file location
    Path,
}

/// Handle config command
///
/// If no subcommand is given, defaults to Show.
pub fn cmd_config(args: ConfigArgs, config: &Config, quiet: bool) -> Result<()> {
    match args.command {
        Some(ConfigSubcommands::Show { json }) => cmd_config_show(config, json, quiet),
        Some(ConfigSubcommands::Path) => {
            let path = get_config_path()
                .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
            println!("{}", path.display());
            Ok(())
        }
        None => cmd_config_show(config, args.json, quiet),
    }
}
