//! caas CLI
//!
//! Command-line interface for the caas agent: run the server, execute
//! scripts over the session channel, and query the REST control plane.

mod api;
mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "caas")]
#[command(about = "caas command-execution agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caas=info,caas_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    commands::handle_command(cli.command).await
}
