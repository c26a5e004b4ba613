//! Server assembly
//!
//! Binds the listener, builds the router, and serves the session channel
//! and REST control plane from one port.

use crate::api;
use crate::cleanup;
use crate::config::ServerConfig;
use crate::state::AppState;
use anyhow::Context;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

pub struct Server {
    state: AppState,
    listener: TcpListener,
}

impl Server {
    /// Validates the configuration and binds the listen socket.
    ///
    /// Port 0 binds an ephemeral port; `local_addr` reports the real one.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        Ok(Self {
            state: AppState::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("no local addr")
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves until the process is stopped.
    pub async fn serve(self) -> anyhow::Result<()> {
        let sweeps = cleanup::spawn_sweeps(&self.state);

        info!("caas agent listening on {}", self.listener.local_addr()?);
        let router = api::create_router(self.state.clone());
        let result = axum::serve(self.listener, router)
            .await
            .context("server error");

        for handle in sweeps {
            handle.abort();
        }
        result
    }
}
