//! Host shell runner
//!
//! Runs the script as `<shell> -c <script>` in the job workdir, pumping
//! stdout/stderr chunks into the attached sinks. Cancellation kills the
//! child; a timeout does the same and is reported as its own category.

use super::{ProcessRunner, RunnerError, RunnerSpec};
use crate::sink::OutputSink;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ShellRunner {
    spec: RunnerSpec,
    stdout: Mutex<Option<Arc<dyn OutputSink>>>,
    stderr: Mutex<Option<Arc<dyn OutputSink>>>,
    cancel: CancellationToken,
}

impl ShellRunner {
    pub fn new(spec: RunnerSpec) -> Self {
        Self {
            spec,
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn command(&self) -> Command {
        let spec = &self.spec;
        let mut cmd = if spec.user.is_empty() {
            let mut cmd = Command::new(&spec.shell);
            cmd.arg("-c").arg(&spec.script);
            cmd
        } else {
            let mut cmd = Command::new("sudo");
            cmd.args([
                "-u",
                spec.user.as_str(),
                spec.shell.as_str(),
                "-c",
                spec.script.as_str(),
            ]);
            cmd
        };
        cmd.current_dir(&spec.workdir)
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    fn set_stdout(&self, sink: Arc<dyn OutputSink>) {
        *self.stdout.lock().expect("stdout sink lock poisoned") = Some(sink);
    }

    fn set_stderr(&self, sink: Arc<dyn OutputSink>) {
        *self.stderr.lock().expect("stderr sink lock poisoned") = Some(sink);
    }

    async fn run(&self) -> Result<(), RunnerError> {
        let mut child = self.command().spawn().map_err(RunnerError::Spawn)?;

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
                debug!(id = %self.spec.id, "killing cancelled command");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunnerError::Terminated)
            }
            _ = deadline => {
                debug!(id = %self.spec.id, "killing timed-out command");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunnerError::Timeout(timeout.unwrap_or_default()))
            }
        };

        // Flush remaining output before reporting the exit.
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

/// Copies chunks from a child stream into the sink until EOF.
pub(super) async fn pump<R>(mut reader: R, sink: Option<Arc<dyn OutputSink>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Some(sink) = &sink {
                    sink.write(&buf[..n]).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use std::collections::HashMap;
    use std::time::Duration;

    fn runner(script: &str) -> (ShellRunner, Arc<BufferSink>, Arc<BufferSink>) {
        let spec = RunnerSpec {
            id: "test".to_string(),
            script: script.to_string(),
            shell: "sh".to_string(),
            workdir: std::env::temp_dir(),
            environment: HashMap::new(),
            user: String::new(),
            engine: String::new(),
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            platform: String::new(),
            network: String::new(),
            privileged: false,
            timeout: None,
        };
        let runner = ShellRunner::new(spec);
        let stdout = Arc::new(BufferSink::new());
        let stderr = Arc::new(BufferSink::new());
        runner.set_stdout(stdout.clone());
        runner.set_stderr(stderr.clone());
        (runner, stdout, stderr)
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let (runner, stdout, _) = runner("echo hi");
        runner.run().await.unwrap();
        assert_eq!(stdout.to_string_lossy(), "hi\n");
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let (runner, stdout, stderr) = runner("echo oops >&2");
        runner.run().await.unwrap();
        assert_eq!(stdout.to_string_lossy(), "");
        assert_eq!(stderr.to_string_lossy(), "oops\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_categorised() {
        let (runner, _, _) = runner("exit 3");
        match runner.run().await {
            Err(RunnerError::Exit { code }) => assert_eq!(code, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_environment_reaches_script() {
        let (mut runner, stdout, _) = runner("echo $GREETING");
        runner
            .spec
            .environment
            .insert("GREETING".to_string(), "salute".to_string());
        runner.run().await.unwrap();
        assert_eq!(stdout.to_string_lossy(), "salute\n");
    }

    #[tokio::test]
    async fn test_cancel_kills_promptly() {
        let (runner, _, _) = runner("sleep 30");
        let runner = Arc::new(runner);

        let canceller = runner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        match runner.run().await {
            Err(RunnerError::Terminated) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_timeout_is_its_own_category() {
        let (mut runner, _, _) = runner("sleep 30");
        runner.spec.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        match runner.run().await {
            Err(e) => assert!(e.is_timeout(), "expected timeout, got {e:?}"),
            Ok(()) => panic!("expected timeout"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
