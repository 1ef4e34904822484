use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Gateway settings stored in keygate.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshDefaults,
    #[serde(default)]
    pub drain: DrainConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl GatewayConfig {
    /// Load from file, falling back to defaults if it does not exist.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match super::paths::config_file() {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
                        path: path.clone(),
                        source: e,
                    })?;
                Self::from_toml_str(&content)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("KEYGATE_LISTEN") {
            if !listen.trim().is_empty() {
                self.server.listen = listen.trim().to_string();
            }
        }
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.listen_addr()?;

        if self.drain.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "drain.chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.ssh.terminal_cols == 0 || self.ssh.terminal_rows == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ssh.terminal_cols/terminal_rows",
                reason: "terminal size must be non-zero".to_string(),
            });
        }

        if self.session.max_queued_commands == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_queued_commands",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::ListenAddress(self.listen.clone()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// How private key material reaches the SSH transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Decode the key in memory; nothing touches the disk
    #[default]
    Memory,
    /// Write an owner-only key file for the duration of the connect call
    File,
}

fn default_timeout() -> u64 {
    30
}

fn default_keepalive() -> u64 {
    60
}

fn default_port() -> u16 {
    22
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_key_comment() -> String {
    "keygate".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshDefaults {
    #[serde(default = "default_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default)]
    pub credential_mode: CredentialMode,
    /// Directory for temporary key files (defaults to the runtime dir)
    #[serde(default)]
    pub credential_dir: Option<PathBuf>,
    #[serde(default = "default_cols")]
    pub terminal_cols: u16,
    #[serde(default = "default_rows")]
    pub terminal_rows: u16,
    /// Comment appended to generated public keys
    #[serde(default = "default_key_comment")]
    pub key_comment: String,
}

impl SshDefaults {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn credential_dir(&self) -> PathBuf {
        self.credential_dir
            .clone()
            .unwrap_or_else(super::paths::credential_dir)
    }
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 30,
            keepalive_interval_secs: 60,
            default_port: 22,
            credential_mode: CredentialMode::default(),
            credential_dir: None,
            terminal_cols: 80,
            terminal_rows: 24,
            key_comment: default_key_comment(),
        }
    }
}

fn default_settle_ms() -> u64 {
    100
}

fn default_chunk_size() -> usize {
    4096
}

/// Output drain tuning for `execute`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Wait after writing a command before the first readiness check
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Wait between readiness checks once the channel runs dry
    #[serde(default)]
    pub poll_interval_ms: u64,
    /// Extra empty checks before the drain stops (0 stops at the first empty check)
    #[serde(default)]
    pub idle_polls: u32,
    /// Maximum bytes read per output event
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum output events per execute (0 = unbounded)
    #[serde(default)]
    pub max_chunks: usize,
}

impl DrainConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            poll_interval_ms: 0,
            idle_polls: 0,
            chunk_size: 4096,
            max_chunks: 0,
        }
    }
}

fn default_unclaimed_ttl() -> u64 {
    300
}

fn default_max_queued_commands() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds a provisioned but unopened session is kept (0 = forever)
    #[serde(default = "default_unclaimed_ttl")]
    pub unclaimed_ttl_secs: u64,
    /// Frames a client may send ahead while a command is still running
    #[serde(default = "default_max_queued_commands")]
    pub max_queued_commands: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            unclaimed_ttl_secs: 300,
            max_queued_commands: 32,
        }
    }
}
