//! Process runner adapter
//!
//! Uniform facade over the concrete execution primitive. `build` selects
//! an engine from the spec: the host shell, or a container engine CLI
//! (docker/podman). Construction fails on an unknown engine or a container
//! engine without an image.
//!
//! Contract: `run` blocks until the process terminates, returning `Ok(())`
//! on exit 0 or a `RunnerError` carrying the exit code otherwise. `cancel`
//! requests best-effort termination and returns immediately; `run` then
//! returns promptly. Sinks must be attached before `run`.

pub mod container;
pub mod shell;

use crate::sink::OutputSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Everything a runner needs to launch one process.
#[derive(Debug, Clone)]
pub struct RunnerSpec {
    /// Job id; used to name containers.
    pub id: String,
    pub script: String,
    pub shell: String,
    pub workdir: PathBuf,
    pub environment: HashMap<String, String>,
    pub user: String,
    pub engine: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub platform: String,
    pub network: String,
    pub privileged: bool,
    pub timeout: Option<Duration>,
}

/// Errors from process execution.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("command exited with code {code}")]
    Exit { code: i32 },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command terminated before exit")]
    Terminated,

    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),

    #[error("engine {0} requires an image")]
    MissingImage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// The process exit code, when this error categorises one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Attaches the stdout sink; must be called before `run`.
    fn set_stdout(&self, sink: Arc<dyn OutputSink>);

    /// Attaches the stderr sink; must be called before `run`.
    fn set_stderr(&self, sink: Arc<dyn OutputSink>);

    /// Runs the process to termination.
    async fn run(&self) -> Result<(), RunnerError>;

    /// Requests best-effort termination. Idempotent; never blocks.
    fn cancel(&self);
}

/// Builds a runner for the spec's engine.
pub fn build(spec: RunnerSpec) -> Result<Arc<dyn ProcessRunner>, RunnerError> {
    match spec.engine.as_str() {
        "" | "host" => Ok(Arc::new(shell::ShellRunner::new(spec))),
        "docker" | "podman" => {
            if spec.image.is_empty() {
                return Err(RunnerError::MissingImage(spec.engine));
            }
            Ok(Arc::new(container::ContainerRunner::new(spec)))
        }
        other => Err(RunnerError::UnsupportedEngine(other.to_string())),
    }
}
