//! Error types for the caas client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the caas client
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server address is not a ws:// or wss:// URL
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// The underlying WebSocket failed
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] caas_core::protocol::ProtocolError),

    /// The server rejected the credentials
    #[error("failed to authenticate: {0}")]
    Auth(String),

    /// An operation was attempted before `connect`
    #[error("not connected")]
    NotConnected,

    /// The connection went away mid-operation
    #[error("connection closed")]
    Closed,

    /// The exec timeout elapsed before an exit code arrived
    #[error("command exec timeout")]
    ExecTimeout,

    /// The command terminated with a non-zero exit code
    #[error("exit code: {code}")]
    Exit { code: i32 },
}

impl ClientError {
    /// The command exit code, when this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }
}
