//! `caas list` / `caas get` / `caas cancel`: REST control plane

use crate::api::ControlApi;
use anyhow::Result;
use caas_core::domain::job::JobStatus;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args)]
pub struct CommandArgs {
    /// Command id
    id: String,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args)]
pub struct ConnectionArgs {
    /// Agent REST address
    #[arg(long, env = "CAAS_API", default_value = "http://localhost:8838")]
    server: String,

    /// Auth client id
    #[arg(long, env = "CAAS_CLIENT_ID")]
    client_id: Option<String>,

    /// Auth client secret
    #[arg(long, env = "CAAS_CLIENT_SECRET")]
    client_secret: Option<String>,
}

impl ConnectionArgs {
    fn api(&self) -> ControlApi {
        let credentials = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        };
        ControlApi::new(&self.server, credentials)
    }
}

pub async fn handle_list(args: ListArgs) -> Result<()> {
    let list = args.connection.api().list().await?;

    println!("{} command(s) total", list.total);
    for command in &list.commands {
        let started = command
            .started_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}",
            command.id,
            colorize_status(command.status),
            started,
            command.script.lines().next().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn handle_get(args: CommandArgs) -> Result<()> {
    let detail = args.connection.api().get(&args.id).await?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

pub async fn handle_cancel(args: CommandArgs) -> Result<()> {
    args.connection.api().cancel(&args.id).await?;
    println!("{}", format!("command {} cancelled", args.id).green());
    Ok(())
}

fn colorize_status(status: JobStatus) -> String {
    let text = status.to_string();
    match status {
        JobStatus::Completed => text.green().to_string(),
        JobStatus::Running | JobStatus::Pending => text.cyan().to_string(),
        JobStatus::Cancelled => text.yellow().to_string(),
        JobStatus::Error => text.red().to_string(),
    }
}
