//! Output sinks
//!
//! Byte-stream destinations for job stdout/stderr. A job tees every chunk
//! into the external sink wired by its creator (session frame writer,
//! capture buffer) and its own log ring; `MultiSink` composes several
//! destinations the way the metadata log file is combined with the frame
//! writer.
//!
//! Writes are best-effort and never propagate errors back into the
//! process pump; a failing destination is logged and skipped.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, chunk: &[u8]);
}

/// Fans a chunk out to every inner sink, in order.
pub struct MultiSink {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl OutputSink for MultiSink {
    async fn write(&self, chunk: &[u8]) {
        for sink in &self.sinks {
            sink.write(chunk).await;
        }
    }
}

/// Appends chunks to a file.
pub struct FileSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileSink {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write(&self, chunk: &[u8]) {
        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(chunk).await {
            warn!("failed to append to log file: {e}");
        }
    }
}

/// Collects chunks in memory; used by the synchronous exec endpoint and
/// in tests.
#[derive(Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().expect("buffer sink lock poisoned").clone()
    }

    /// The captured output as a lossy UTF-8 string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn write(&self, chunk: &[u8]) {
        self.buf
            .lock()
            .expect("buffer sink lock poisoned")
            .extend_from_slice(chunk);
    }
}
