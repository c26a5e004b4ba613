//! Command request types
//!
//! A `CommandRequest` is the immutable description of one job, shared
//! between the session channel (as a Command frame payload), the REST
//! control plane, and the client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A script-execution request.
///
/// All fields are optional on the wire; the server fills in defaults
/// (id, shell, workdir base, timeout) before building a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    /// Job id; generated by the server when empty.
    pub id: String,
    /// The script text to execute.
    pub script: String,
    /// Environment variables visible to the script.
    pub environment: HashMap<String, String>,
    /// Base directory under which the per-job workdir is created.
    pub workdirbase: String,
    /// Shell used to interpret the script (server default when empty).
    pub shell: String,
    /// User to run as (host engine only).
    pub user: String,
    /// Execution engine: empty/"host", "docker", or "podman".
    pub engine: String,
    /// Container image (required for container engines).
    pub image: String,
    /// CPU limit in cores (container engines).
    pub cpu: f64,
    /// Memory limit in bytes (container engines).
    pub memory: i64,
    /// Container platform, e.g. "linux/amd64".
    pub platform: String,
    /// Container network mode.
    pub network: String,
    /// Run the container privileged.
    pub privileged: bool,
    /// Timeout in milliseconds; 0 means no request-level timeout.
    pub timeout: i64,
}

impl CommandRequest {
    /// Builds a minimal request for the given script.
    pub fn from_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }
}

/// Credentials presented by a client in an AuthRequest frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRequest {
    pub client_id: String,
    pub client_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_request_defaults_from_sparse_json() {
        let req: CommandRequest = serde_json::from_str(r#"{"script":"echo hi"}"#).unwrap();
        assert_eq!(req.script, "echo hi");
        assert_eq!(req.id, "");
        assert_eq!(req.timeout, 0);
        assert!(req.environment.is_empty());
        assert!(!req.privileged);
    }

    #[test]
    fn test_command_request_round_trip() {
        let mut req = CommandRequest::from_script("exit 3");
        req.id = "job-1".to_string();
        req.environment
            .insert("FOO".to_string(), "bar".to_string());
        req.engine = "docker".to_string();
        req.image = "alpine:latest".to_string();
        req.cpu = 1.5;
        req.memory = 1024;
        req.timeout = 30_000;

        let json = serde_json::to_string(&req).unwrap();
        let back: CommandRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "job-1");
        assert_eq!(back.environment.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(back.cpu, 1.5);
        assert_eq!(back.timeout, 30_000);
    }

    #[test]
    fn test_auth_request_keys() {
        let auth: AuthRequest =
            serde_json::from_str(r#"{"client_id":"a","client_secret":"b"}"#).unwrap();
        assert_eq!(auth.client_id, "a");
        assert_eq!(auth.client_secret, "b");
    }
}
