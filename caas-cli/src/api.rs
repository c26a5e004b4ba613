//! REST client for the agent's control plane

use anyhow::{Context, Result};
use caas_core::dto::{CommandDetail, CommandList};
use reqwest::{Client, RequestBuilder};

pub struct ControlApi {
    base_url: String,
    client: Client,
    credentials: Option<(String, String)>,
}

impl ControlApi {
    pub fn new(base_url: impl Into<String>, credentials: Option<(String, String)>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            credentials,
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    pub async fn list(&self) -> Result<CommandList> {
        let url = format!("{}/commands", self.base_url);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("failed to reach agent")?;

        if !response.status().is_success() {
            anyhow::bail!("agent returned {}", response.status());
        }
        response.json().await.context("failed to parse command list")
    }

    pub async fn get(&self, id: &str) -> Result<CommandDetail> {
        let url = format!("{}/commands/{id}", self.base_url);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("failed to reach agent")?;

        if response.status().as_u16() == 404 {
            anyhow::bail!("command {id} not found");
        }
        if !response.status().is_success() {
            anyhow::bail!("agent returned {}", response.status());
        }
        response.json().await.context("failed to parse command")
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        let url = format!("{}/commands/{id}/cancel", self.base_url);
        let response = self
            .authed(self.client.post(&url))
            .send()
            .await
            .context("failed to reach agent")?;

        if response.status().as_u16() == 404 {
            anyhow::bail!("command {id} not found");
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("cancel failed: {status} - {body}");
        }
        Ok(())
    }
}
