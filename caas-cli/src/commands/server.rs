//! `caas server`: run the agent

use anyhow::Result;
use caas_server::config::{parse_environment, ServerConfig};
use caas_server::server::Server;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ServerArgs {
    /// Server port
    #[arg(short, long, env = "PORT", default_value_t = 8838)]
    port: u16,

    /// Shell used to run commands
    #[arg(short, long, env = "CAAS_SHELL", default_value = "sh")]
    shell: String,

    /// Base directory for per-command metadata
    #[arg(long, env = "CAAS_METADATA_DIR", default_value = "/tmp/caas/metadata")]
    metadata_dir: PathBuf,

    /// Base directory for per-command workdirs
    #[arg(short, long, env = "CAAS_WORKDIR", default_value = "/tmp/caas/workdir")]
    workdir: PathBuf,

    /// Command environment, comma-separated K=V pairs
    #[arg(short, long, env = "CAAS_ENVIRONMENT")]
    environment: Option<String>,

    /// Auth client id
    #[arg(long, env = "CAAS_CLIENT_ID", default_value = "")]
    client_id: String,

    /// Auth client secret
    #[arg(long, env = "CAAS_CLIENT_SECRET", default_value = "")]
    client_secret: String,

    /// Command timeout in seconds (0 disables)
    #[arg(short, long, env = "CAAS_TIMEOUT", default_value_t = 86_400)]
    timeout: i64,

    /// Remove each command's workdir after it terminates
    #[arg(long, env = "CAAS_AUTO_CLEAN_WORKDIR")]
    auto_clean_workdir: bool,

    /// Keep the weekly workdir sweep from running
    #[arg(long, env = "CAAS_DISABLE_CLEAN_WORKDIR")]
    disable_clean_workdir: bool,

    /// Keep the monthly metadata sweep from running
    #[arg(long, env = "CAAS_DISABLE_CLEAN_METADATADIR")]
    disable_clean_metadatadir: bool,

    /// Let commands keep running when their session disconnects
    #[arg(long, env = "CAAS_DISABLE_COMMAND_CANCEL_ON_CLOSE")]
    disable_command_cancel_on_close: bool,
}

pub async fn handle(args: ServerArgs) -> Result<()> {
    let environment = match &args.environment {
        Some(raw) => parse_environment(raw)?,
        None => Default::default(),
    };

    let config = ServerConfig {
        port: args.port,
        shell: args.shell,
        environment,
        timeout_secs: args.timeout,
        client_id: args.client_id,
        client_secret: args.client_secret,
        metadata_dir: args.metadata_dir,
        workdir: args.workdir,
        auto_clean_workdir: args.auto_clean_workdir,
        cancel_on_close_disabled: args.disable_command_cancel_on_close,
        clean_workdir_disabled: args.disable_clean_workdir,
        clean_metadata_dir_disabled: args.disable_clean_metadatadir,
        timeouts: Default::default(),
    };

    Server::bind(config).await?.serve().await
}
