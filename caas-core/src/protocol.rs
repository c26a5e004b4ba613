//! Session wire protocol
//!
//! Every message on the session channel is a frame: a single tag byte
//! followed by the payload. Tag values are fixed and must match across
//! client and server:
//!
//! ```text
//! 0x01 AuthRequest            C->S  JSON {client_id, client_secret}
//! 0x02 AuthResponseSuccess    S->C  empty
//! 0x03 AuthResponseFailure    S->C  UTF-8 error text
//! 0x10 Command                C->S  JSON command request
//! 0x11 CommandStdout          S->C  raw bytes
//! 0x12 CommandStderr          S->C  raw bytes
//! 0x13 CommandExitCode        S->C  one byte
//! 0x20 CommandCancelRequest   C->S  empty
//! 0x21 CommandCancelResponse  S->C  empty
//! 0x30 Ping                   C->S  empty
//! ```
//!
//! Frames travel as WebSocket binary messages; decoding also accepts the
//! same bytes arriving as a text message.

use crate::domain::command::{AuthRequest, CommandRequest};
use thiserror::Error;

pub const AUTH_REQUEST: u8 = 0x01;
pub const AUTH_RESPONSE_SUCCESS: u8 = 0x02;
pub const AUTH_RESPONSE_FAILURE: u8 = 0x03;
pub const COMMAND: u8 = 0x10;
pub const COMMAND_STDOUT: u8 = 0x11;
pub const COMMAND_STDERR: u8 = 0x12;
pub const COMMAND_EXIT_CODE: u8 = 0x13;
pub const COMMAND_CANCEL_REQUEST: u8 = 0x20;
pub const COMMAND_CANCEL_RESPONSE: u8 = 0x21;
pub const PING: u8 = 0x30;

/// Errors from frame encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("frame {0:#04x} is missing its payload")]
    MissingPayload(u8),

    #[error("invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded session frame.
#[derive(Debug, Clone)]
pub enum Frame {
    AuthRequest(AuthRequest),
    AuthResponseSuccess,
    AuthResponseFailure(String),
    Command(CommandRequest),
    CommandStdout(Vec<u8>),
    CommandStderr(Vec<u8>),
    CommandExitCode(u8),
    CommandCancelRequest,
    CommandCancelResponse,
    Ping,
}

impl Frame {
    /// The tag byte for this frame.
    pub fn tag(&self) -> u8 {
        match self {
            Frame::AuthRequest(_) => AUTH_REQUEST,
            Frame::AuthResponseSuccess => AUTH_RESPONSE_SUCCESS,
            Frame::AuthResponseFailure(_) => AUTH_RESPONSE_FAILURE,
            Frame::Command(_) => COMMAND,
            Frame::CommandStdout(_) => COMMAND_STDOUT,
            Frame::CommandStderr(_) => COMMAND_STDERR,
            Frame::CommandExitCode(_) => COMMAND_EXIT_CODE,
            Frame::CommandCancelRequest => COMMAND_CANCEL_REQUEST,
            Frame::CommandCancelResponse => COMMAND_CANCEL_RESPONSE,
            Frame::Ping => PING,
        }
    }

    /// Encodes the frame as tag byte + payload.
    ///
    /// Only JSON-carrying frames can fail to encode.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![self.tag()];
        match self {
            Frame::AuthRequest(auth) => buf.extend(serde_json::to_vec(auth)?),
            Frame::Command(command) => buf.extend(serde_json::to_vec(command)?),
            Frame::AuthResponseFailure(message) => buf.extend(message.as_bytes()),
            Frame::CommandStdout(data) | Frame::CommandStderr(data) => buf.extend(data),
            Frame::CommandExitCode(code) => buf.push(*code),
            Frame::AuthResponseSuccess
            | Frame::CommandCancelRequest
            | Frame::CommandCancelResponse
            | Frame::Ping => {}
        }
        Ok(buf)
    }

    /// Decodes a raw frame.
    pub fn decode(raw: &[u8]) -> Result<Frame, ProtocolError> {
        let (&tag, payload) = raw.split_first().ok_or(ProtocolError::Empty)?;
        let frame = match tag {
            AUTH_REQUEST => Frame::AuthRequest(serde_json::from_slice(payload)?),
            AUTH_RESPONSE_SUCCESS => Frame::AuthResponseSuccess,
            AUTH_RESPONSE_FAILURE => {
                Frame::AuthResponseFailure(String::from_utf8_lossy(payload).into_owned())
            }
            COMMAND => Frame::Command(serde_json::from_slice(payload)?),
            COMMAND_STDOUT => Frame::CommandStdout(payload.to_vec()),
            COMMAND_STDERR => Frame::CommandStderr(payload.to_vec()),
            COMMAND_EXIT_CODE => {
                let code = *payload.first().ok_or(ProtocolError::MissingPayload(tag))?;
                Frame::CommandExitCode(code)
            }
            COMMAND_CANCEL_REQUEST => Frame::CommandCancelRequest,
            COMMAND_CANCEL_RESPONSE => Frame::CommandCancelResponse,
            PING => Frame::Ping,
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_frames_round_trip() {
        for frame in [
            Frame::AuthResponseSuccess,
            Frame::CommandCancelRequest,
            Frame::CommandCancelResponse,
            Frame::Ping,
        ] {
            let raw = frame.encode().unwrap();
            assert_eq!(raw.len(), 1);
            let decoded = Frame::decode(&raw).unwrap();
            assert_eq!(decoded.tag(), frame.tag());
        }
    }

    #[test]
    fn test_auth_request_round_trip() {
        let frame = Frame::AuthRequest(AuthRequest {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        });
        let raw = frame.encode().unwrap();
        assert_eq!(raw[0], AUTH_REQUEST);

        match Frame::decode(&raw).unwrap() {
            Frame::AuthRequest(auth) => {
                assert_eq!(auth.client_id, "id");
                assert_eq!(auth.client_secret, "secret");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_command_round_trip() {
        let frame = Frame::Command(CommandRequest::from_script("echo hi"));
        let raw = frame.encode().unwrap();
        assert_eq!(raw[0], COMMAND);

        match Frame::decode(&raw).unwrap() {
            Frame::Command(command) => assert_eq!(command.script, "echo hi"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_stdout_carries_raw_bytes() {
        let frame = Frame::CommandStdout(vec![0xff, 0x00, b'h', b'i']);
        let raw = frame.encode().unwrap();
        match Frame::decode(&raw).unwrap() {
            Frame::CommandStdout(data) => assert_eq!(data, vec![0xff, 0x00, b'h', b'i']),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_exit_code_single_byte() {
        let raw = Frame::CommandExitCode(3).encode().unwrap();
        assert_eq!(raw, vec![COMMAND_EXIT_CODE, 3]);

        match Frame::decode(&raw).unwrap() {
            Frame::CommandExitCode(code) => assert_eq!(code, 3),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(Frame::decode(&[]), Err(ProtocolError::Empty)));
        assert!(matches!(
            Frame::decode(&[0x7f]),
            Err(ProtocolError::UnknownTag(0x7f))
        ));
        assert!(matches!(
            Frame::decode(&[COMMAND_EXIT_CODE]),
            Err(ProtocolError::MissingPayload(COMMAND_EXIT_CODE))
        ));
        assert!(matches!(
            Frame::decode(&[COMMAND, b'{']),
            Err(ProtocolError::Json(_))
        ));
    }
}
