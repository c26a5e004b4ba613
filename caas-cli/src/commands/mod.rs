//! CLI subcommands

pub mod control;
pub mod exec;
pub mod server;

use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent server
    Server(server::ServerArgs),
    /// Execute a script on an agent over the session channel
    Exec(exec::ExecArgs),
    /// List recent commands
    List(control::ListArgs),
    /// Show one command
    Get(control::CommandArgs),
    /// Cancel a running command
    Cancel(control::CommandArgs),
}

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Server(args) => server::handle(args).await,
        Commands::Exec(args) => exec::handle(args).await,
        Commands::List(args) => control::handle_list(args).await,
        Commands::Get(args) => control::handle_get(args).await,
        Commands::Cancel(args) => control::handle_cancel(args).await,
    }
}
