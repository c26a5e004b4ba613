//! Session channel
//!
//! Per-connection state machine for the WebSocket session. Each
//! connection gets one reader loop and one writer task; the writer is
//! the sole owner of the outbound sink, so frames reach the peer in
//! submission order. Long-running command execution happens on its own
//! task so heartbeats and cancels stay responsive, and a panic there is
//! recovered into a stderr + exit-code-1 answer.
//!
//! Timers: an unauthenticated connection is closed after the auth
//! budget; any connection silent past the heartbeat budget is closed.
//! A Ping frame extends the heartbeat deadline.

use crate::job::{Job, JobError};
use crate::metadata::{CommandMetadata, STATUS_CANCELLED, STATUS_FAILURE, STATUS_SUCCESS};
use crate::sink::{MultiSink, OutputSink};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use caas_core::domain::command::{AuthRequest, CommandRequest};
use caas_core::domain::job::JobStatus;
use caas_core::protocol::{Frame, COMMAND};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound writer commands.
enum Outbound {
    Frame(Frame),
    Close,
}

/// Serves one session connection to completion.
pub async fn handle_socket(state: AppState, socket: WebSocket) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(64);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => match frame.encode() {
                    Ok(raw) => {
                        if ws_sink.send(Message::Binary(raw.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to encode frame: {e}"),
                },
                Outbound::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let session = Arc::new(Session {
        state: state.clone(),
        conn_id: conn_id.clone(),
        tx: tx.clone(),
        authenticated: AtomicBool::new(state.config.auth_disabled()),
        job: Mutex::new(None),
        closed: CancellationToken::new(),
    });

    debug!(id = %conn_id, "session connected");

    let timeouts = state.config.timeouts;
    let mut auth_timer_armed = true;
    let auth_deadline = Instant::now() + timeouts.auth;
    let mut heartbeat_deadline = Instant::now() + timeouts.heartbeat;

    loop {
        tokio::select! {
            _ = session.closed.cancelled() => break,
            _ = tokio::time::sleep_until(auth_deadline),
                if auth_timer_armed && !session.is_authenticated() =>
            {
                debug!(id = %conn_id, "authentication timeout");
                break;
            }
            _ = tokio::time::sleep_until(heartbeat_deadline) => {
                debug!(id = %conn_id, "heartbeat timeout");
                break;
            }
            message = ws_stream.next() => {
                let Some(Ok(message)) = message else { break };
                let raw = match message {
                    Message::Binary(data) => data.to_vec(),
                    Message::Text(text) => text.as_bytes().to_vec(),
                    Message::Close(_) => break,
                    // Protocol-level ping/pong is the carrier's business.
                    _ => continue,
                };

                let frame = match Frame::decode(&raw) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(id = %conn_id, "bad frame: {e}");
                        if raw.first() == Some(&COMMAND) {
                            session.send(Frame::CommandStderr(
                                b"invalid command request\n".to_vec(),
                            )).await;
                            session.send(Frame::CommandExitCode(1)).await;
                        }
                        continue;
                    }
                };

                match frame {
                    Frame::Ping => {
                        debug!(id = %conn_id, "receive ping");
                        heartbeat_deadline = Instant::now() + timeouts.heartbeat;
                    }
                    Frame::AuthRequest(auth) => {
                        auth_timer_armed = false;
                        session.handle_auth(auth).await;
                    }
                    Frame::Command(command) => {
                        spawn_command_task(session.clone(), command);
                    }
                    Frame::CommandCancelRequest => {
                        let session = session.clone();
                        tokio::spawn(async move { session.handle_cancel().await });
                    }
                    other => {
                        error!(id = %conn_id, "unexpected frame tag: {:#04x}", other.tag());
                    }
                }
            }
        }
    }

    session.on_close();
    let _ = tx.send(Outbound::Close).await;
    let _ = writer.await;
    debug!(id = %conn_id, "session closed");
}

/// Runs the command handler on its own task and converts a panic into
/// the internal-server-error answer.
fn spawn_command_task(session: Arc<Session>, command: CommandRequest) {
    tokio::spawn(async move {
        let tx = session.tx.clone();
        let handler = {
            let session = session.clone();
            tokio::spawn(async move { session.handle_command(command).await })
        };

        if let Err(e) = handler.await {
            if e.is_panic() {
                let panic = e.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("command task panicked: {message}");

                let stderr = format!("internal server error: {message}\n");
                let _ = tx
                    .send(Outbound::Frame(Frame::CommandStderr(stderr.into_bytes())))
                    .await;
                let _ = tx.send(Outbound::Frame(Frame::CommandExitCode(1))).await;
            }
        }
    });
}

struct Session {
    state: AppState,
    conn_id: String,
    tx: mpsc::Sender<Outbound>,
    authenticated: AtomicBool,
    job: Mutex<Option<Arc<Job>>>,
    closed: CancellationToken,
}

impl Session {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Frame) {
        let _ = self.tx.send(Outbound::Frame(frame)).await;
    }

    async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
        self.closed.cancel();
    }

    async fn handle_auth(&self, auth: AuthRequest) {
        info!(id = %self.conn_id, "auth request");
        match self
            .state
            .config
            .authenticate(&auth.client_id, &auth.client_secret)
        {
            Ok(()) => {
                self.authenticated.store(true, Ordering::SeqCst);
                info!(id = %self.conn_id, "authenticated");
                self.send(Frame::AuthResponseSuccess).await;
            }
            Err(reason) => {
                error!(id = %self.conn_id, "failed to authenticate: {reason}");
                self.send(Frame::AuthResponseFailure(format!(
                    "failed to authenticate: {reason}\n"
                )))
                .await;
                self.send(Frame::CommandExitCode(1)).await;
                self.close().await;
            }
        }
    }

    async fn handle_command(self: Arc<Self>, mut command: CommandRequest) {
        if !self.is_authenticated() {
            error!(id = %self.conn_id, "not authenticated");
            self.send(Frame::CommandStderr(b"not authenticated\n".to_vec()))
                .await;
            self.send(Frame::CommandExitCode(1)).await;
            self.close().await;
            return;
        }

        let config = self.state.config.clone();
        if command.id.is_empty() {
            command.id = self.conn_id.clone();
        }
        if command.shell.is_empty() {
            command.shell = config.shell.clone();
        }
        if command.workdirbase.is_empty() {
            command.workdirbase = config.workdir.to_string_lossy().into_owned();
        }
        merge_environment(&mut command.environment, &config.environment);
        if command.timeout == 0 && config.timeout_secs > 0 {
            command.timeout = config.timeout_secs * 1000;
        }

        let job = Job::new(command);
        self.state.counters.track(&job);
        self.state.registry.insert(job.clone());
        *self.job.lock().expect("session job lock poisoned") = Some(job.clone());

        let metadata = match CommandMetadata::create(&config.metadata_dir, job.id()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(id = %job.id(), "failed to create metadata dir: {e}");
                self.send(Frame::CommandStderr(b"internal server error\n".to_vec()))
                    .await;
                self.send(Frame::CommandExitCode(1)).await;
                return;
            }
        };
        metadata.write_script(&job.command().script).await;
        metadata.write_env(&job.command().environment).await;
        metadata.write_start_at().await;

        let log_sink: Arc<dyn OutputSink> = match metadata.log_sink().await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!(id = %job.id(), "failed to open log file: {e}");
                self.send(Frame::CommandStderr(b"internal server error\n".to_vec()))
                    .await;
                self.send(Frame::CommandExitCode(1)).await;
                return;
            }
        };

        job.set_stdout(Arc::new(MultiSink::new(vec![
            log_sink.clone(),
            Arc::new(FrameSink {
                tx: self.tx.clone(),
                stderr: false,
            }),
        ])));
        job.set_stderr(Arc::new(MultiSink::new(vec![
            log_sink,
            Arc::new(FrameSink {
                tx: self.tx.clone(),
                stderr: true,
            }),
        ])));

        info!(id = %job.id(), "command start to run");
        match job.run().await {
            Ok(()) => {
                metadata.write_succeed_at().await;
                metadata.write_status(STATUS_SUCCESS).await;
                self.send(Frame::CommandExitCode(0)).await;
                info!(id = %job.id(), "command succeeded");
            }
            Err(err) => {
                metadata.write_error(&err.to_string()).await;
                if job.status() == JobStatus::Cancelled {
                    // The cancel path already answered the peer.
                    metadata.write_status(STATUS_CANCELLED).await;
                } else {
                    metadata.write_failed_at().await;
                    metadata.write_status(STATUS_FAILURE).await;
                    let code = err.exit_code();
                    error!(id = %job.id(), "command failed (exit code: {code}): {err}");
                    self.send(Frame::CommandExitCode((code & 0xff) as u8)).await;
                }
            }
        }

        if config.auto_clean_workdir {
            let workdir =
                std::path::PathBuf::from(&job.command().workdirbase).join(job.id());
            if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                warn!("failed to clean workdir {}: {e}", workdir.display());
            }
        }
    }

    async fn handle_cancel(self: Arc<Self>) {
        let job = self.job.lock().expect("session job lock poisoned").clone();
        if let Some(job) = &job {
            job.request_cancel();
            // Give in-flight output a moment to flush before the kill.
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Err(e) = job.cancel() {
                match e {
                    JobError::NotRunning => debug!(id = %job.id(), "cancel before run: {e}"),
                    other => warn!(id = %job.id(), "cancel failed: {other}"),
                }
            }
        }
        self.send(Frame::CommandCancelResponse).await;
        self.send(Frame::CommandExitCode(0)).await;
    }

    /// Cancel-on-close policy: a running job whose session disconnects
    /// is cancelled unless the server disables it (which lets a client
    /// reconnect after a redeploy while the job keeps running).
    fn on_close(&self) {
        if self.state.config.cancel_on_close_disabled {
            return;
        }
        let job = self.job.lock().expect("session job lock poisoned").clone();
        if let Some(job) = job {
            if job.is_running() {
                info!(id = %job.id(), "session closed, cancelling running command");
                job.mark_killed_by_close();
                if let Err(e) = job.cancel() {
                    debug!(id = %job.id(), "cancel on close: {e}");
                }
            }
        }
    }
}

/// Packages output chunks as stdout/stderr frames on the outbound writer.
struct FrameSink {
    tx: mpsc::Sender<Outbound>,
    stderr: bool,
}

#[async_trait]
impl OutputSink for FrameSink {
    async fn write(&self, chunk: &[u8]) {
        let frame = if self.stderr {
            Frame::CommandStderr(chunk.to_vec())
        } else {
            Frame::CommandStdout(chunk.to_vec())
        };
        let _ = self.tx.send(Outbound::Frame(frame)).await;
    }
}

/// Merges the server environment into the request's: the request wins,
/// except server-scoped keys (prefixed `CAAS_`) where the server wins.
fn merge_environment(
    request: &mut HashMap<String, String>,
    server: &HashMap<String, String>,
) {
    for (key, value) in server {
        if key.starts_with("CAAS_") || !request.contains_key(key) {
            request.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_environment_request_wins() {
        let mut request = HashMap::from([("PATH".to_string(), "/custom".to_string())]);
        let server = HashMap::from([
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("CI".to_string(), "true".to_string()),
        ]);

        merge_environment(&mut request, &server);
        assert_eq!(request.get("PATH"), Some(&"/custom".to_string()));
        assert_eq!(request.get("CI"), Some(&"true".to_string()));
    }

    #[test]
    fn test_merge_environment_server_scoped_keys_win() {
        let mut request = HashMap::from([("CAAS_AGENT".to_string(), "spoofed".to_string())]);
        let server = HashMap::from([("CAAS_AGENT".to_string(), "server".to_string())]);

        merge_environment(&mut request, &server);
        assert_eq!(request.get("CAAS_AGENT"), Some(&"server".to_string()));
    }
}
