//! Job lifecycle
//!
//! A `Job` owns one command request and carries its runtime state:
//! status flags, timestamps, the bounded log ring, an event bus, and the
//! process runner handle (absent until `run` starts it).
//!
//! State machine: `run` moves the job to running and ends it in exactly
//! one of completed / cancelled / error. `cancel` is idempotent, never
//! blocks on process exit, and fails with "not running" before the runner
//! handle exists; a cancel requested that early is observed by `run`
//! before it starts the runner.

use crate::event::EventBus;
use crate::runner::{self, ProcessRunner, RunnerError, RunnerSpec};
use crate::sink::{MultiSink, OutputSink};
use async_trait::async_trait;
use caas_core::domain::command::CommandRequest;
use caas_core::domain::job::JobStatus;
use caas_core::domain::log::LogRing;
use caas_core::dto::{CommandDetail, CommandSummary};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub const EVENT_RUN: &str = "run";
pub const EVENT_COMPLETE: &str = "complete";
pub const EVENT_CANCEL: &str = "cancel";
pub const EVENT_ERROR: &str = "error";

/// Live fan-out ring capacity.
pub const LOG_RING_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job is not running")]
    NotRunning,

    #[error("job already ran")]
    AlreadyRan,

    #[error("command cancelled")]
    Cancelled,

    #[error("command cancelled (connection closed)")]
    KilledByClose,

    #[error("stdout and stderr sinks must be attached before run")]
    MissingSink,

    #[error("failed to create workdir {}: {source}", path.display())]
    Workdir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to run command: {0}")]
    Runner(#[from] RunnerError),
}

impl JobError {
    /// The exit code to report to the peer: the runner's code when
    /// categorised, 127 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Runner(e) => e.exit_code().unwrap_or(127),
            _ => 127,
        }
    }
}

#[derive(Debug, Default)]
struct JobState {
    status: Option<JobStatus>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    errored_at: Option<DateTime<Utc>>,
    is_completed: bool,
    is_cancelled: bool,
    is_error: bool,
    is_killed_by_close: bool,
    is_timeout: bool,
    cancel_requested: bool,
    error: Option<String>,
}

impl JobState {
    fn status(&self) -> JobStatus {
        self.status.unwrap_or(JobStatus::Pending)
    }

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

pub struct Job {
    id: String,
    command: CommandRequest,
    log: Arc<LogRing>,
    events: EventBus,
    state: Mutex<JobState>,
    runner: Mutex<Option<Arc<dyn ProcessRunner>>>,
    stdout: Mutex<Option<Arc<dyn OutputSink>>>,
    stderr: Mutex<Option<Arc<dyn OutputSink>>>,
}

impl Job {
    /// Builds a job from a command request, generating an id when the
    /// request carries none.
    pub fn new(command: CommandRequest) -> Arc<Self> {
        let id = if command.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            command.id.clone()
        };
        Arc::new(Self {
            id,
            command,
            log: Arc::new(LogRing::new(LOG_RING_CAPACITY)),
            events: EventBus::new(),
            state: Mutex::new(JobState::default()),
            runner: Mutex::new(None),
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &CommandRequest {
        &self.command
    }

    pub fn log(&self) -> Arc<LogRing> {
        self.log.clone()
    }

    /// Subscribes to a lifecycle event (run/complete/cancel/error).
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on(event, handler);
    }

    pub fn set_stdout(&self, sink: Arc<dyn OutputSink>) {
        *self.stdout.lock().expect("job stdout lock poisoned") = Some(sink);
    }

    pub fn set_stderr(&self, sink: Arc<dyn OutputSink>) {
        *self.stderr.lock().expect("job stderr lock poisoned") = Some(sink);
    }

    /// A job is running while no terminal flag is set.
    pub fn is_running(&self) -> bool {
        !self.state.lock().expect("job state lock poisoned").is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().expect("job state lock poisoned").status()
    }

    pub fn is_killed_by_close(&self) -> bool {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .is_killed_by_close
    }

    pub fn is_timeout(&self) -> bool {
        self.state.lock().expect("job state lock poisoned").is_timeout
    }

    /// Flags the job as killed because its session closed. Set before
    /// `cancel` so the run path skips the error event.
    pub fn mark_killed_by_close(&self) {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .is_killed_by_close = true;
    }

    /// Records a cancel request without acting on it; `run` checks the
    /// flag before starting the runner, and a later `cancel` acts on it.
    pub fn request_cancel(&self) {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .cancel_requested = true;
    }

    /// Requests cancellation.
    ///
    /// Fails with `NotRunning` when the runner handle has not been set
    /// yet; the request is still recorded and `run` honours it before
    /// starting the runner. On a terminal job this is a no-op.
    pub fn cancel(&self) -> Result<(), JobError> {
        let runner = {
            let mut state = self.state.lock().expect("job state lock poisoned");
            state.cancel_requested = true;
            if state.is_terminal() {
                return Ok(());
            }

            let runner = self.runner.lock().expect("job runner lock poisoned").clone();
            let Some(runner) = runner else {
                return Err(JobError::NotRunning);
            };

            state.is_cancelled = true;
            state.status = Some(JobStatus::Cancelled);
            runner
        };

        self.events.emit(EVENT_CANCEL, &self.id);
        runner.cancel();
        Ok(())
    }

    /// Runs the command to a terminal state.
    ///
    /// Creates the workdir, constructs the runner, tees its output into
    /// the attached sinks and the log ring, and blocks until the process
    /// terminates. Returns an error on every non-success terminal.
    pub async fn run(&self) -> Result<(), JobError> {
        {
            let mut state = self.state.lock().expect("job state lock poisoned");
            if state.started_at.is_some() {
                return Err(JobError::AlreadyRan);
            }
            state.status = Some(JobStatus::Running);
            state.started_at = Some(Utc::now());
        }
        self.events.emit(EVENT_RUN, &self.id);

        let workdir = PathBuf::from(&self.command.workdirbase).join(&self.id);
        if let Err(source) = tokio::fs::create_dir_all(&workdir).await {
            return Err(self.fail(JobError::Workdir {
                path: workdir,
                source,
            }));
        }

        let stdout = self.stdout.lock().expect("job stdout lock poisoned").clone();
        let stderr = self.stderr.lock().expect("job stderr lock poisoned").clone();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(self.fail(JobError::MissingSink));
        };

        let timeout = if self.command.timeout > 0 {
            Some(Duration::from_millis(self.command.timeout as u64))
        } else {
            None
        };

        let runner = match runner::build(RunnerSpec {
            id: self.id.clone(),
            script: self.command.script.clone(),
            shell: self.command.shell.clone(),
            workdir,
            environment: self.command.environment.clone(),
            user: self.command.user.clone(),
            engine: self.command.engine.clone(),
            image: self.command.image.clone(),
            cpu: self.command.cpu,
            memory: self.command.memory,
            platform: self.command.platform.clone(),
            network: self.command.network.clone(),
            privileged: self.command.privileged,
            timeout,
        }) {
            Ok(runner) => runner,
            Err(e) => return Err(self.fail(e.into())),
        };

        runner.set_stdout(Arc::new(MultiSink::new(vec![
            stdout,
            Arc::new(RingSink {
                ring: self.log.clone(),
            }),
        ])));
        runner.set_stderr(Arc::new(MultiSink::new(vec![
            stderr,
            Arc::new(RingSink {
                ring: self.log.clone(),
            }),
        ])));

        {
            // Single protected section for the cancel-vs-run race: a
            // cancel that arrived before the runner handle existed wins
            // here, before the process starts.
            let mut state = self.state.lock().expect("job state lock poisoned");
            if state.cancel_requested {
                state.is_cancelled = true;
                state.status = Some(JobStatus::Cancelled);
                drop(state);
                self.events.emit(EVENT_CANCEL, &self.id);
                return Err(JobError::Cancelled);
            }
            *self.runner.lock().expect("job runner lock poisoned") = Some(runner.clone());
        }

        let run_result = runner.run().await;

        // Release the sink references so per-job file handles close once
        // the run is over; the runner handle stays (it marks that the job
        // entered running).
        *self.stdout.lock().expect("job stdout lock poisoned") = None;
        *self.stderr.lock().expect("job stderr lock poisoned") = None;

        match run_result {
            Ok(()) => {
                let emit = {
                    let mut state = self.state.lock().expect("job state lock poisoned");
                    if state.is_terminal() {
                        false
                    } else {
                        state.is_completed = true;
                        state.status = Some(JobStatus::Completed);
                        state.completed_at = Some(Utc::now());
                        true
                    }
                };
                if emit {
                    self.events.emit(EVENT_COMPLETE, &self.id);
                    info!(id = %self.id, "command completed");
                }
                Ok(())
            }
            Err(e) => {
                {
                    let state = self.state.lock().expect("job state lock poisoned");
                    if state.is_killed_by_close {
                        info!(id = %self.id, "command cancelled (connection closed)");
                        return Err(JobError::KilledByClose);
                    }
                    if state.is_cancelled {
                        info!(id = %self.id, "command cancelled");
                        return Err(JobError::Cancelled);
                    }
                }

                let is_timeout = e.is_timeout();
                let err = self.fail_with(JobError::Runner(e), is_timeout);
                error!(
                    id = %self.id,
                    "command failed: {err}\n##### SCRIPT START #####\n{}\n##### SCRIPT END #####",
                    self.command.script
                );
                Err(err)
            }
        }
    }

    /// Terminal error transition + error event; returns the error back.
    fn fail(&self, err: JobError) -> JobError {
        self.fail_with(err, false)
    }

    fn fail_with(&self, err: JobError, is_timeout: bool) -> JobError {
        let emit = {
            let mut state = self.state.lock().expect("job state lock poisoned");
            if state.is_terminal() {
                false
            } else {
                state.is_error = true;
                state.is_timeout = is_timeout;
                state.status = Some(JobStatus::Error);
                state.errored_at = Some(Utc::now());
                state.error = Some(err.to_string());
                true
            }
        };
        if emit {
            self.events.emit(EVENT_ERROR, &self.id);
        }
        err
    }

    pub fn summary(&self) -> CommandSummary {
        let state = self.state.lock().expect("job state lock poisoned");
        CommandSummary {
            id: self.id.clone(),
            script: self.command.script.clone(),
            status: state.status(),
            started_at: state.started_at,
        }
    }

    pub fn detail(&self) -> CommandDetail {
        let state = self.state.lock().expect("job state lock poisoned");
        CommandDetail {
            id: self.id.clone(),
            script: self.command.script.clone(),
            status: state.status(),
            started_at: state.started_at,
            completed_at: state.completed_at,
            errored_at: state.errored_at,
            is_completed: state.is_completed,
            is_cancelled: state.is_cancelled,
            is_error: state.is_error,
            is_killed_by_close: state.is_killed_by_close,
            is_timeout: state.is_timeout,
            error: state.error.clone(),
            log: self.log.snapshot(),
        }
    }
}

/// Packages each output chunk as a log record on the job's ring.
struct RingSink {
    ring: Arc<LogRing>,
}

#[async_trait]
impl OutputSink for RingSink {
    async fn write(&self, chunk: &[u8]) {
        self.ring.push(String::from_utf8_lossy(chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job_for(script: &str) -> (Arc<Job>, Arc<BufferSink>, Arc<BufferSink>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut command = CommandRequest::from_script(script);
        command.shell = "sh".to_string();
        command.workdirbase = dir.path().to_string_lossy().into_owned();

        let job = Job::new(command);
        let stdout = Arc::new(BufferSink::new());
        let stderr = Arc::new(BufferSink::new());
        job.set_stdout(stdout.clone());
        job.set_stderr(stderr.clone());
        (job, stdout, stderr, dir)
    }

    fn count_events(job: &Job, event: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        job.on(event, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (job, stdout, _, dir) = job_for("echo hi");
        let runs = count_events(&job, EVENT_RUN);
        let completes = count_events(&job, EVENT_COMPLETE);

        job.run().await.unwrap();

        assert_eq!(stdout.to_string_lossy(), "hi\n");
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(!job.is_running());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 1);

        // Output also landed on the ring.
        let records = job.log().snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].log, "hi\n");

        // Workdir was provisioned under the base.
        assert!(dir.path().join(job.id()).is_dir());
    }

    #[tokio::test]
    async fn test_nonzero_exit_becomes_error() {
        let (job, _, _, _dir) = job_for("exit 3");
        let errors = count_events(&job, EVENT_ERROR);

        let err = job.run().await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        let detail = job.detail();
        assert!(detail.is_error);
        assert!(!detail.is_completed && !detail.is_cancelled);
        assert!(detail.error.is_some());
        assert!(detail.errored_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let (job, _, _, _dir) = job_for("sleep 30");
        let cancels = count_events(&job, EVENT_CANCEL);
        let errors = count_events(&job, EVENT_ERROR);

        let canceller = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel().unwrap();
            // Second cancel must be a silent no-op.
            canceller.cancel().unwrap();
        });

        let started = std::time::Instant::now();
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_run_fails_fast_but_sticks() {
        let (job, _, _, _dir) = job_for("echo never");
        let cancels = count_events(&job, EVENT_CANCEL);

        assert!(matches!(job.cancel(), Err(JobError::NotRunning)));

        // The recorded request wins before the runner starts.
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_killed_by_close_skips_error_event() {
        let (job, _, _, _dir) = job_for("sleep 30");
        let cancels = count_events(&job, EVENT_CANCEL);
        let errors = count_events(&job, EVENT_ERROR);

        let closer = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            closer.mark_killed_by_close();
            closer.cancel().unwrap();
        });

        let err = job.run().await.unwrap_err();
        assert!(matches!(err, JobError::KilledByClose));
        assert!(job.is_killed_by_close());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = CommandRequest::from_script("sleep 30");
        command.shell = "sh".to_string();
        command.workdirbase = dir.path().to_string_lossy().into_owned();
        command.timeout = 200;

        let job = Job::new(command);
        job.set_stdout(Arc::new(BufferSink::new()));
        job.set_stderr(Arc::new(BufferSink::new()));
        let errors = count_events(&job, EVENT_ERROR);

        let err = job.run().await.unwrap_err();
        assert_eq!(err.exit_code(), 127);
        assert!(job.is_timeout());
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_engine_is_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = CommandRequest::from_script("echo hi");
        command.shell = "sh".to_string();
        command.workdirbase = dir.path().to_string_lossy().into_owned();
        command.engine = "hypervisor".to_string();

        let job = Job::new(command);
        job.set_stdout(Arc::new(BufferSink::new()));
        job.set_stderr(Arc::new(BufferSink::new()));
        let errors = count_events(&job, EVENT_ERROR);

        let err = job.run().await.unwrap_err();
        assert_eq!(err.exit_code(), 127);
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_is_single_shot() {
        let (job, _, _, _dir) = job_for("true");
        job.run().await.unwrap();
        assert!(matches!(job.run().await, Err(JobError::AlreadyRan)));
    }

    #[test]
    fn test_id_defaults_to_generated() {
        let job = Job::new(CommandRequest::from_script("true"));
        assert!(!job.id().is_empty());

        let mut command = CommandRequest::from_script("true");
        command.id = "chosen".to_string();
        assert_eq!(Job::new(command).id(), "chosen");
    }
}
