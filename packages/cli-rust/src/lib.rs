//! hostkeep CLI - Bootstrap and harden remote Linux hosts over SSH
//!
//! This module contains the shared CLI implementation used by all binaries.

mod commands;
mod output;
mod prompt;
mod targets;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use hostkeep_core::{config, get_version, load_config};
use tracing_subscriber::EnvFilter;

/// Bootstrap and harden remote Linux hosts over SSH
#[derive(Parser)]
#[command(name = "hostkeep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bootstrap and harden remote Linux hosts over SSH", long_about = None)]
#[command(after_help = get_banner())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every setup step against hosts
    Setup(commands::SetupArgs),
    /// Run a single setup step
    Step(commands::StepArgs),
    /// Undo a step from its backups
    Rollback(commands::RollbackArgs),
    /// Inspect or edit a host's recorded state
    State(commands::StateArgs),
    /// Manage the host inventory
    Host(commands::HostArgs),
    /// Inspect configuration
    Config(commands::ConfigArgs),
}

/// Get the ASCII banner for help display
fn get_banner() -> &'static str {
    r#"
  _               _   _
 | |__   ___  ___| |_| | _____  ___ _ __
 | '_ \ / _ \/ __| __| |/ / _ \/ _ \ '_ \
 | | | | (_) \__ \ |_|   <  __/  __/ |_) |
 |_| |_|\___/|___/\__|_|\_\___|\___| .__/
                                   |_|
"#
}

/// Install the tracing subscriber; `RUST_LOG` wins over the flags
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn,hostkeep=info,hostkeep_core=info",
        (false, 1) => "info,hostkeep=debug,hostkeep_core=debug",
        (false, _) => "debug,hostkeep=trace,hostkeep_core=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // Configure color output
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let config_path = config::paths::get_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    // Load config (creates default if missing)
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Configuration error", style("Error:").red().bold());
            eprintln!();
            eprintln!("  {e:#}");
            eprintln!();
            eprintln!("  Config file: {}", style(config_path.display()).yellow());
            eprintln!();
            eprintln!(
                "  {} Check the config file for syntax errors or unknown fields.",
                style("Tip:").cyan()
            );
            std::process::exit(1);
        }
    };

    if cli.verbose > 0 {
        eprintln!(
            "{} Config: {}",
            style("[info]").cyan(),
            config_path.display()
        );
    }

    match cli.command {
        Some(Commands::Setup(args)) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::cmd_setup(&args, config, cli.quiet))
        }
        Some(Commands::Step(args)) => commands::cmd_step(&args, config, cli.quiet),
        Some(Commands::Rollback(args)) => commands::cmd_rollback(&args, config, cli.quiet),
        Some(Commands::State(args)) => commands::cmd_state(args, &config, cli.quiet),
        Some(Commands::Host(args)) => commands::cmd_host(args, &config, cli.quiet),
        Some(Commands::Config(args)) => commands::cmd_config(args, &config, cli.quiet),
        None => {
            // No command - show a welcome message and hint to use --help
            if !cli.quiet {
                println!(
                    "{} {}",
                    style("hostkeep").cyan().bold(),
                    style(get_version()).dim()
                );
                println!();
                println!("Run {} for available commands.", style("--help").green());
            }
            Ok(())
        }
    }
}
