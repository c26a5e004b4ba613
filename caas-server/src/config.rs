//! Server configuration
//!
//! Defines all configurable parameters for the agent: listen port, shell,
//! directories, credentials, the global command timeout, and the session
//! timer budgets.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8838;
pub const DEFAULT_SHELL: &str = "sh";
pub const DEFAULT_METADATA_DIR: &str = "/tmp/caas/metadata";
pub const DEFAULT_WORKDIR: &str = "/tmp/caas/workdir";
/// Default global command timeout: one day, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i64 = 86_400;

/// Session timer budgets.
///
/// Both default to 30 seconds; tests shrink them to exercise expiry.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// How long an unauthenticated connection may live.
    pub auth: Duration,
    /// How long the connection may go without traffic before it is closed.
    pub heartbeat: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            auth: Duration::from_secs(30),
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Agent server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Default shell for commands that do not name one.
    pub shell: String,
    /// Server-side environment merged into every command.
    pub environment: HashMap<String, String>,
    /// Global command timeout in seconds, adopted by requests that carry
    /// no timeout of their own. 0 disables the global timeout.
    pub timeout_secs: i64,
    /// Client credentials; when both are empty, authentication is bypassed.
    pub client_id: String,
    pub client_secret: String,
    /// Base directory for per-job metadata.
    pub metadata_dir: PathBuf,
    /// Base directory for per-job workdirs.
    pub workdir: PathBuf,
    /// Remove a job's workdir after it terminates.
    pub auto_clean_workdir: bool,
    /// Disable the running-command cancel when its session disconnects.
    pub cancel_on_close_disabled: bool,
    /// Disable the weekly workdir sweep.
    pub clean_workdir_disabled: bool,
    /// Disable the monthly metadata sweep.
    pub clean_metadata_dir_disabled: bool,
    /// Session timer budgets.
    pub timeouts: SessionTimeouts,
}

impl ServerConfig {
    /// Creates configuration from environment variables.
    ///
    /// Recognized variables: `PORT`, `CAAS_SHELL`, `CAAS_METADATA_DIR`,
    /// `CAAS_WORKDIR`, `CAAS_ENVIRONMENT` (comma-separated `K=V` pairs),
    /// `CAAS_CLIENT_ID`, `CAAS_CLIENT_SECRET`, `CAAS_TIMEOUT` (seconds),
    /// `CAAS_AUTO_CLEAN_WORKDIR`, `CAAS_DISABLE_CLEAN_WORKDIR`,
    /// `CAAS_DISABLE_CLEAN_METADATADIR`,
    /// `CAAS_DISABLE_COMMAND_CANCEL_ON_CLOSE`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid PORT: {port}"))?;
        }
        if let Some(shell) = env_var("CAAS_SHELL") {
            config.shell = shell;
        }
        if let Some(dir) = env_var("CAAS_METADATA_DIR") {
            config.metadata_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("CAAS_WORKDIR") {
            config.workdir = PathBuf::from(dir);
        }
        if let Some(env) = env_var("CAAS_ENVIRONMENT") {
            config.environment = parse_environment(&env)?;
        }
        if let Some(id) = env_var("CAAS_CLIENT_ID") {
            config.client_id = id;
        }
        if let Some(secret) = env_var("CAAS_CLIENT_SECRET") {
            config.client_secret = secret;
        }
        if let Some(timeout) = env_var("CAAS_TIMEOUT") {
            config.timeout_secs = timeout
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CAAS_TIMEOUT: {timeout}"))?;
        }
        config.auto_clean_workdir = env_flag("CAAS_AUTO_CLEAN_WORKDIR");
        config.clean_workdir_disabled = env_flag("CAAS_DISABLE_CLEAN_WORKDIR");
        config.clean_metadata_dir_disabled = env_flag("CAAS_DISABLE_CLEAN_METADATADIR");
        config.cancel_on_close_disabled = env_flag("CAAS_DISABLE_COMMAND_CANCEL_ON_CLOSE");

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shell.is_empty() {
            anyhow::bail!("shell cannot be empty");
        }
        if self.timeout_secs < 0 {
            anyhow::bail!("timeout cannot be negative");
        }
        if self.client_id.is_empty() != self.client_secret.is_empty() {
            anyhow::bail!("client_id and client_secret must be set together");
        }
        Ok(())
    }

    /// True when no credentials are configured and authentication is
    /// bypassed for both the session channel and the REST plane.
    pub fn auth_disabled(&self) -> bool {
        self.client_id.is_empty() && self.client_secret.is_empty()
    }

    /// Checks a credential pair against the configured one.
    pub fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<(), String> {
        if self.auth_disabled() {
            return Ok(());
        }
        if client_id == self.client_id && client_secret == self.client_secret {
            Ok(())
        } else {
            Err("invalid client_id or client_secret".to_string())
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            shell: DEFAULT_SHELL.to_string(),
            environment: HashMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            client_id: String::new(),
            client_secret: String::new(),
            metadata_dir: PathBuf::from(DEFAULT_METADATA_DIR),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            auto_clean_workdir: false,
            cancel_on_close_disabled: false,
            clean_workdir_disabled: false,
            clean_metadata_dir_disabled: false,
            timeouts: SessionTimeouts::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

/// Parses `K=V,K2=V2` into a map.
pub fn parse_environment(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut environment = HashMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid environment entry: {pair}"))?;
        environment.insert(key.trim().to_string(), value.to_string());
    }
    Ok(environment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8838);
        assert_eq!(config.shell, "sh");
        assert_eq!(config.timeout_secs, 86_400);
        assert!(config.auth_disabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.client_id = "id".to_string();
        assert!(config.validate().is_err());

        config.client_secret = "secret".to_string();
        assert!(config.validate().is_ok());

        config.shell = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_authenticate() {
        let mut config = ServerConfig::default();
        // No credentials configured: everything passes.
        assert!(config.authenticate("", "").is_ok());
        assert!(config.authenticate("x", "y").is_ok());

        config.client_id = "id".to_string();
        config.client_secret = "secret".to_string();
        assert!(config.authenticate("id", "secret").is_ok());
        assert!(config.authenticate("id", "wrong").is_err());
        assert!(config.authenticate("", "").is_err());
    }

    #[test]
    fn test_parse_environment() {
        let env = parse_environment("FOO=bar,BAZ=qux=1").unwrap();
        assert_eq!(env.get("FOO"), Some(&"bar".to_string()));
        // Only the first '=' splits key from value.
        assert_eq!(env.get("BAZ"), Some(&"qux=1".to_string()));

        assert!(parse_environment("missing-separator").is_err());
        assert!(parse_environment("").unwrap().is_empty());
    }
}
