//! `caas exec`: run a script on an agent over the session channel

use anyhow::Result;
use caas_client::{Client, ClientConfig, ClientError};
use caas_core::domain::command::CommandRequest;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct ExecArgs {
    /// Agent address, e.g. ws://localhost:8838
    #[arg(long, env = "CAAS_SERVER", default_value = "ws://localhost:8838")]
    server: String,

    /// Auth client id
    #[arg(long, env = "CAAS_CLIENT_ID", default_value = "")]
    client_id: String,

    /// Auth client secret
    #[arg(long, env = "CAAS_CLIENT_SECRET", default_value = "")]
    client_secret: String,

    /// Shell to interpret the script
    #[arg(long)]
    shell: Option<String>,

    /// Execution engine (host, docker, podman)
    #[arg(long)]
    engine: Option<String>,

    /// Container image for container engines
    #[arg(long)]
    image: Option<String>,

    /// Timeout in milliseconds
    #[arg(long)]
    timeout: Option<i64>,

    /// The script to execute
    script: String,
}

pub async fn handle(args: ExecArgs) -> Result<()> {
    let client = Client::new(ClientConfig {
        server: args.server,
        client_id: args.client_id,
        client_secret: args.client_secret,
        ..ClientConfig::default()
    });
    client.connect().await?;

    let mut command = CommandRequest::from_script(args.script);
    if let Some(shell) = args.shell {
        command.shell = shell;
    }
    if let Some(engine) = args.engine {
        command.engine = engine;
    }
    if let Some(image) = args.image {
        command.image = image;
    }
    if let Some(timeout) = args.timeout {
        command.timeout = timeout;
    }

    let result = tokio::select! {
        result = client.exec(&command) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "interrupted, cancelling command...".yellow());
            let result = client.cancel().await;
            client.close();
            return match result {
                Ok(()) => std::process::exit(130),
                Err(e) => Err(e.into()),
            };
        }
    };
    client.close();

    match result {
        Ok(()) => Ok(()),
        Err(ClientError::Exit { code }) => {
            eprintln!("{}", format!("command failed with exit code {code}").red());
            std::process::exit(code);
        }
        Err(e) => Err(e.into()),
    }
}
