//! caas Client
//!
//! WebSocket client session for the caas agent. Connects, authenticates,
//! keeps the connection alive with pings, and executes commands while
//! routing stdout/stderr frames into local sinks.
//!
//! # Example
//!
//! ```no_run
//! use caas_client::{Client, ClientConfig};
//! use caas_core::domain::command::CommandRequest;
//!
//! #[tokio::main]
//! async fn main() -> caas_client::Result<()> {
//!     let client = Client::new(ClientConfig {
//!         server: "ws://localhost:8838".to_string(),
//!         ..ClientConfig::default()
//!     });
//!     client.connect().await?;
//!     client.exec(&CommandRequest::from_script("echo hi")).await?;
//!     client.close();
//!     Ok(())
//! }
//! ```

pub mod error;

pub use error::{ClientError, Result};

use caas_core::domain::command::{AuthRequest, CommandRequest};
use caas_core::protocol::Frame;
use futures_util::{SinkExt, StreamExt};
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Interval between keep-alive pings.
const PING_INTERVAL: Duration = Duration::from_secs(3);
/// Default `exec` timeout: seven days.
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Destination for stdout/stderr frames.
pub trait OutputSink: Send + Sync {
    fn write(&self, chunk: &[u8]);
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent address, e.g. `ws://localhost:8838` or `wss://...`.
    pub server: String,
    pub client_id: String,
    pub client_secret: String,
    /// How long `exec` waits for an exit code.
    pub exec_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "ws://localhost:8838".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

type SharedSink = Arc<Mutex<Arc<dyn OutputSink>>>;

pub struct Client {
    config: ClientConfig,
    stdout: SharedSink,
    stderr: SharedSink,
    outbound: mpsc::Sender<Frame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    exit: broadcast::Sender<i32>,
    close: CancellationToken,
    connected: Arc<AtomicBool>,
}

impl Client {
    /// Creates a client; `connect` establishes the session.
    pub fn new(config: ClientConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(64);
        let (exit, _) = broadcast::channel(8);
        let stdout: Arc<dyn OutputSink> = Arc::new(StdStreamSink { stderr: false });
        let stderr: Arc<dyn OutputSink> = Arc::new(StdStreamSink { stderr: true });
        Self {
            config,
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            exit,
            close: CancellationToken::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the stdout sink (defaults to the process stdout).
    pub fn set_stdout(&self, sink: Arc<dyn OutputSink>) {
        *self.stdout.lock().expect("stdout sink lock poisoned") = sink;
    }

    /// Replaces the stderr sink (defaults to the process stderr).
    pub fn set_stderr(&self, sink: Arc<dyn OutputSink>) {
        *self.stderr.lock().expect("stderr sink lock poisoned") = sink;
    }

    /// Connects, authenticates, and starts the ping and outbound pumps.
    ///
    /// Returns once the server has answered the auth request.
    pub async fn connect(&self) -> Result<()> {
        if !self.config.server.starts_with("ws://") && !self.config.server.starts_with("wss://") {
            return Err(ClientError::InvalidAddress(self.config.server.clone()));
        }
        debug!("connecting to {}", self.config.server);

        let (stream, _) = tokio_tungstenite::connect_async(&self.config.server).await?;
        let (mut ws_sink, mut ws_stream) = stream.split();

        // Outbound pump: sole writer to the socket.
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .expect("outbound lock poisoned")
            .take()
            .ok_or(ClientError::Closed)?;
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let raw = match frame.encode() {
                            Ok(raw) => raw,
                            Err(e) => {
                                error!("failed to encode frame: {e}");
                                continue;
                            }
                        };
                        if ws_sink.send(Message::Binary(raw.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader: routes inbound frames. Sinks are re-read per frame so
        // `output` can swap them after connect.
        let (auth_tx, auth_rx) = oneshot::channel::<std::result::Result<(), String>>();
        {
            let stdout = self.stdout.clone();
            let stderr = self.stderr.clone();
            let exit = self.exit.clone();
            let connected = self.connected.clone();
            let close = self.close.clone();
            tokio::spawn(async move {
                let write_stdout = move |chunk: &[u8]| {
                    stdout.lock().expect("stdout sink lock poisoned").write(chunk);
                };
                let write_stderr = move |chunk: &[u8]| {
                    stderr.lock().expect("stderr sink lock poisoned").write(chunk);
                };
                let mut auth_tx = Some(auth_tx);
                loop {
                    let message = tokio::select! {
                        _ = close.cancelled() => break,
                        message = ws_stream.next() => message,
                    };
                    let Some(Ok(message)) = message else {
                        if connected.load(Ordering::SeqCst) {
                            write_stderr(b"connection closed from server\n");
                            let _ = exit.send(1);
                        }
                        break;
                    };
                    let raw = match message {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.as_bytes().to_vec(),
                        Message::Close(_) => {
                            if connected.load(Ordering::SeqCst) {
                                write_stderr(b"connection closed from server\n");
                                let _ = exit.send(1);
                            }
                            break;
                        }
                        _ => continue,
                    };
                    match Frame::decode(&raw) {
                        Ok(Frame::CommandStdout(data)) => write_stdout(&data),
                        Ok(Frame::CommandStderr(data)) => write_stderr(&data),
                        Ok(Frame::CommandExitCode(code)) => {
                            let _ = exit.send(code as i32);
                        }
                        Ok(Frame::AuthResponseSuccess) => {
                            if let Some(tx) = auth_tx.take() {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        Ok(Frame::AuthResponseFailure(reason)) => {
                            if let Some(tx) = auth_tx.take() {
                                let _ = tx.send(Err(reason));
                            }
                        }
                        Ok(Frame::CommandCancelResponse) => {
                            write_stderr(b"command canceled\n");
                        }
                        Ok(other) => error!("unexpected frame tag: {:#04x}", other.tag()),
                        Err(e) => error!("bad frame from server: {e}"),
                    }
                }
            });
        }

        // Auth request goes out right after connect.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.outbound
            .send(Frame::AuthRequest(AuthRequest {
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
            }))
            .await
            .map_err(|_| ClientError::Closed)?;

        match auth_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(ClientError::Auth(reason.trim_end().to_string())),
            Err(_) => return Err(ClientError::Closed),
        }
        self.connected.store(true, Ordering::SeqCst);

        // Keep-alive pings, every three seconds until close.
        let outbound = self.outbound.clone();
        let close = self.close.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = close.cancelled() => break,
                    _ = ticker.tick() => {
                        if outbound.send(Frame::Ping).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Executes a command, blocking until its exit code arrives.
    ///
    /// Returns `ClientError::Exit` on a non-zero exit code.
    pub async fn exec(&self, command: &CommandRequest) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let mut exit = self.exit.subscribe();
        self.outbound
            .send(Frame::Command(command.clone()))
            .await
            .map_err(|_| ClientError::Closed)?;

        match tokio::time::timeout(self.config.exec_timeout, exit.recv()).await {
            Err(_) => {
                self.sink(true).write(b"command exec timeout\n");
                Err(ClientError::ExecTimeout)
            }
            Ok(Err(_)) => Err(ClientError::Closed),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => Err(ClientError::Exit { code }),
        }
    }

    /// Cancels the in-flight command and waits for the exit code.
    pub async fn cancel(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let mut exit = self.exit.subscribe();
        self.outbound
            .send(Frame::CommandCancelRequest)
            .await
            .map_err(|_| ClientError::Closed)?;

        match exit.recv().await {
            Err(_) => Err(ClientError::Closed),
            Ok(0) => Ok(()),
            Ok(code) => Err(ClientError::Exit { code }),
        }
    }

    /// Executes a command with stdout and stderr captured, returning the
    /// combined trimmed output. A non-zero exit still yields the output.
    pub async fn output(&self, command: &CommandRequest) -> Result<String> {
        let buffer = Arc::new(BufferSink::default());
        self.set_stdout(buffer.clone());
        self.set_stderr(buffer.clone());

        match self.exec(command).await {
            Ok(()) | Err(ClientError::Exit { .. }) => {
                Ok(buffer.to_string_lossy().trim().to_string())
            }
            Err(e) => Err(e),
        }
    }

    /// Signals teardown; pending operations observe a closed connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    fn sink(&self, stderr: bool) -> Arc<dyn OutputSink> {
        if stderr {
            self.stderr.lock().expect("stderr sink lock poisoned").clone()
        } else {
            self.stdout.lock().expect("stdout sink lock poisoned").clone()
        }
    }
}

/// Writes chunks to the process stdout or stderr.
struct StdStreamSink {
    stderr: bool,
}

impl OutputSink for StdStreamSink {
    fn write(&self, chunk: &[u8]) {
        if self.stderr {
            let mut err = std::io::stderr();
            let _ = err.write_all(chunk);
            let _ = err.flush();
        } else {
            let mut out = std::io::stdout();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        }
    }
}

/// Collects output chunks in memory.
#[derive(Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().expect("buffer lock poisoned")).into_owned()
    }
}

impl OutputSink for BufferSink {
    fn write(&self, chunk: &[u8]) {
        self.buf
            .lock()
            .expect("buffer lock poisoned")
            .extend_from_slice(chunk);
    }
}
