//! Per-job metadata persistence
//!
//! Each job gets `<metadata_base>/<id>/` holding `script`, `env`,
//! `start_at`, then on terminal `succeed_at`/`failed_at`, `status`,
//! `error`, plus `log` appended while output streams. Writes are
//! best-effort: a failed metadata write is logged, never fatal to the
//! job.

use crate::sink::FileSink;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";
pub const STATUS_CANCELLED: &str = "cancelled";

pub struct CommandMetadata {
    dir: PathBuf,
}

impl CommandMetadata {
    /// Creates (or reuses) the metadata directory for a job.
    pub async fn create(base: &Path, id: &str) -> std::io::Result<Self> {
        let dir = base.join(id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write_script(&self, script: &str) {
        self.write_file("script", script).await;
    }

    /// Writes the effective environment as sorted `K=V` lines.
    pub async fn write_env(&self, environment: &HashMap<String, String>) {
        let mut keys: Vec<&String> = environment.keys().collect();
        keys.sort();
        let contents = keys
            .iter()
            .map(|k| format!("{k}={}", environment[*k]))
            .collect::<Vec<_>>()
            .join("\n");
        self.write_file("env", &contents).await;
    }

    pub async fn write_start_at(&self) {
        self.write_file("start_at", &timestamp()).await;
    }

    pub async fn write_succeed_at(&self) {
        self.write_file("succeed_at", &timestamp()).await;
    }

    pub async fn write_failed_at(&self) {
        self.write_file("failed_at", &timestamp()).await;
    }

    pub async fn write_status(&self, status: &str) {
        self.write_file("status", status).await;
    }

    pub async fn write_error(&self, error: &str) {
        self.write_file("error", error).await;
    }

    /// Opens the append-only `log` file as an output sink.
    pub async fn log_sink(&self) -> std::io::Result<FileSink> {
        FileSink::open(self.dir.join("log")).await
    }

    pub async fn read_log(&self) -> std::io::Result<String> {
        tokio::fs::read_to_string(self.dir.join("log")).await
    }

    async fn write_file(&self, name: &str, contents: &str) {
        let path = self.dir.join(name);
        if let Err(e) = tokio::fs::write(&path, contents).await {
            warn!("failed to write {}: {e}", path.display());
        }
    }
}

/// `YYYY-MM-DD HH:mm:ss`, the format the metadata files carry.
fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
