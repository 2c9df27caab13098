//! hostkeep host - manage the host inventory

mod add;
mod list;
mod remove;
mod show;
mod test;

use anyhow::Result;
use clap::{Args, Subcommand};
use hostkeep_core::Config;

pub use add::HostAddArgs;
pub use list::HostListArgs;
pub use remove::HostRemoveArgs;
pub use show::HostShowArgs;
pub use test::HostTestArgs;

#[derive(Args)]
pub struct HostArgs {
    #[command(subcommand)]
    command: HostCommands,
}

#[derive(Subcommand)]
enum HostCommands {
    /// Add a host to the inventory
    Add(HostAddArgs),
    /// List inventory hosts
    List(HostListArgs),
    /// Remove a host from the inventory
    Remove(HostRemoveArgs),
    /// Show one host
    Show(HostShowArgs),
    /// Check that a host answers over SSH
    Test(HostTestArgs),
}

pub fn cmd_host(args: HostArgs, config: &Config, quiet: bool) -> Result<()> {
    match args.command {
        HostCommands::Add(args) => add::cmd_host_add(&args, quiet),
        HostCommands::List(args) => list::cmd_host_list(&args, config, quiet),
        HostCommands::Remove(args) => remove::cmd_host_remove(&args, quiet),
        HostCommands::Show(args) => show::cmd_host_show(&args, config, quiet),
        HostCommands::Test(args) => test::cmd_host_test(&args, config, quiet),
    }
}
