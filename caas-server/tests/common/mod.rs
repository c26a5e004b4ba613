//! Shared fixtures for the end-to-end suites
#![allow(dead_code)]

use caas_server::config::ServerConfig;
use caas_server::server::Server;
use caas_server::state::AppState;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    // Held so the metadata/workdir bases outlive the test.
    _dirs: (TempDir, TempDir),
    _server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.addr.port())
    }

    pub fn http_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }
}

/// A config with throwaway directories, no global timeout, and no
/// credentials; tests override what they exercise.
pub fn test_config() -> (ServerConfig, (TempDir, TempDir)) {
    let metadata = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        port: 0,
        timeout_secs: 0,
        metadata_dir: metadata.path().to_path_buf(),
        workdir: workdir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    (config, (metadata, workdir))
}

pub async fn start_server(config: ServerConfig, dirs: (TempDir, TempDir)) -> TestServer {
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state().clone();
    let handle = tokio::spawn(server.serve());
    TestServer {
        addr,
        state,
        _dirs: dirs,
        _server: handle,
    }
}

/// Polls until `check` passes or the deadline expires.
pub async fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
