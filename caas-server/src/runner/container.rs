//! Container runner
//!
//! Shells out to the engine CLI (docker or podman): the job workdir is
//! mounted at /workspace and the script runs as `<shell> -c <script>`
//! inside the image. Cancellation force-removes the container.

use super::shell::pump;
use super::{ProcessRunner, RunnerError, RunnerSpec};
use crate::sink::OutputSink;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ContainerRunner {
    spec: RunnerSpec,
    stdout: Mutex<Option<Arc<dyn OutputSink>>>,
    stderr: Mutex<Option<Arc<dyn OutputSink>>>,
    cancel: CancellationToken,
}

impl ContainerRunner {
    pub fn new(spec: RunnerSpec) -> Self {
        Self {
            spec,
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn container_name(&self) -> String {
        format!("caas-{}", self.spec.id)
    }

    /// Assembles the `<engine> run ...` argument list.
    fn run_args(&self) -> Vec<String> {
        let spec = &self.spec;
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.container_name(),
            "-v".to_string(),
            format!("{}:/workspace", spec.workdir.display()),
            "-w".to_string(),
            "/workspace".to_string(),
        ];

        if !spec.user.is_empty() {
            args.push("--user".to_string());
            args.push(spec.user.clone());
        }
        if spec.cpu > 0.0 {
            args.push("--cpus".to_string());
            args.push(spec.cpu.to_string());
        }
        if spec.memory > 0 {
            args.push("--memory".to_string());
            args.push(spec.memory.to_string());
        }
        if !spec.platform.is_empty() {
            args.push("--platform".to_string());
            args.push(spec.platform.clone());
        }
        if !spec.network.is_empty() {
            args.push("--network".to_string());
            args.push(spec.network.clone());
        }
        if spec.privileged {
            args.push("--privileged".to_string());
        }

        let mut env_keys: Vec<&String> = spec.environment.keys().collect();
        env_keys.sort();
        for key in env_keys {
            args.push("-e".to_string());
            args.push(format!("{key}={}", spec.environment[key]));
        }

        args.push(spec.image.clone());
        args.push(spec.shell.clone());
        args.push("-c".to_string());
        args.push(spec.script.clone());
        args
    }

    /// Force-removes the container; used on cancel and timeout.
    async fn remove_container(&self) {
        let output = Command::new(&self.spec.engine)
            .args(["rm", "-f", &self.container_name()])
            .output()
            .await;
        if let Err(e) = output {
            warn!(
                "failed to remove container {}: {e}",
                self.container_name()
            );
        }
    }
}

#[async_trait]
impl ProcessRunner for ContainerRunner {
    fn set_stdout(&self, sink: Arc<dyn OutputSink>) {
        *self.stdout.lock().expect("stdout sink lock poisoned") = Some(sink);
    }

    fn set_stderr(&self, sink: Arc<dyn OutputSink>) {
        *self.stderr.lock().expect("stderr sink lock poisoned") = Some(sink);
    }

    async fn run(&self) -> Result<(), RunnerError> {
        let mut child = Command::new(&self.spec.engine)
            .args(self.run_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunnerError::Spawn)?;

        let stdout_pump = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, self.stdout.lock().unwrap().clone())));
        let stderr_pump = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, self.stderr.lock().unwrap().clone())));

        let timeout = self.spec.timeout;
        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Ok(status?),
            _ = self.cancel.cancelled() => {
                debug!(id = %self.spec.id, "removing cancelled container");
                self.remove_container().await;
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunnerError::Terminated)
            }
            _ = deadline => {
                debug!(id = %self.spec.id, "removing timed-out container");
                self.remove_container().await;
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunnerError::Timeout(timeout.unwrap_or_default()))
            }
        };

        if let Some(handle) = stdout_pump {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_pump {
            let _ = handle.await;
        }
        *self.stdout.lock().expect("stdout sink lock poisoned") = None;
        *self.stderr.lock().expect("stderr sink lock poisoned") = None;

        let status = outcome?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(RunnerError::Exit { code }),
            None => Err(RunnerError::Terminated),
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}
