use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::SessionId;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid listen address '{0}'")]
    ListenAddress(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to create directory: {0}")]
    CreateDir(std::io::Error),
}

/// Key provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key encoding failed: {0}")]
    Encoding(String),
}

impl From<ssh_key::Error> for ProvisionError {
    fn from(err: ssh_key::Error) -> Self {
        ProvisionError::Encoding(err.to_string())
    }
}

/// Session store errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown session: {0}")]
    NotFound(SessionId),
}

/// SSH-related errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel closed by remote host")]
    ChannelClosed,

    #[error("Timeout connecting to {0}")]
    Timeout(String),

    #[error("russh error: {0}")]
    Russh(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

/// Errors that end a gateway connection
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Client is no longer connected")]
    ClientGone,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session already has an active bridge: {0}")]
    AlreadyActive(SessionId),

    #[error("Too many queued commands (limit {0})")]
    QueueFull(usize),
}
