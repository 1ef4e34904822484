//! SSH transport for the gateway
//!
//! The shell bridge only talks to the remote host through [`ShellTransport`]
//! and [`ShellChannel`]. [`SshClient`] implements them on top of russh.

pub mod auth;
pub mod client;
pub mod handler;
pub mod session;

use std::future::Future;

use secrecy::SecretString;

use crate::credentials::KeyArtifact;
use crate::error::SshError;

pub use client::SshClient;
pub use session::SshSession;

/// Where a remote shell should be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
}

/// Private key handed to the transport for one authentication attempt
///
/// A `File` source owns its artifact. The file is deleted as soon as the
/// source is consumed by [`auth::load_key`] or dropped.
pub enum KeySource<'a> {
    /// OpenSSH PEM kept in memory
    Memory(&'a SecretString),
    /// Temporary key file
    File(KeyArtifact),
}

impl std::fmt::Debug for KeySource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Memory(_) => f.debug_tuple("Memory").field(&"[REDACTED]").finish(),
            KeySource::File(artifact) => f.debug_tuple("File").field(&artifact.path()).finish(),
        }
    }
}

/// Opens authenticated interactive shells on remote hosts.
pub trait ShellTransport: Send + Sync + 'static {
    type Channel: ShellChannel;

    /// Authenticate as `target.username` with `key` and start an interactive shell.
    fn open_shell(
        &self,
        target: &ShellTarget,
        key: KeySource<'_>,
    ) -> impl Future<Output = Result<Self::Channel, SshError>> + Send;
}

/// A live interactive shell channel.
pub trait ShellChannel: Send + Sync + 'static {
    /// Write bytes to the remote shell.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), SshError>> + Send;

    /// Read up to `max` bytes that are already available, without waiting.
    ///
    /// Returns `Ok(None)` when nothing is available yet and
    /// `Err(SshError::ChannelClosed)` once the remote side has closed and all
    /// buffered output was consumed.
    fn try_recv(&mut self, max: usize) -> Result<Option<Vec<u8>>, SshError>;

    /// Close the channel and its transport session. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
