//! Shell bridge: one browser session's view of a remote shell
//!
//! A [`ShellBridge`] owns at most one [`ShellConnection`] and turns commands
//! into [`Event`]s. Execution is a write followed by a settle-then-poll drain
//! of whatever output the shell produced.

pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;

use crate::config::{CredentialMode, DrainConfig, GatewayConfig};
use crate::credentials::artifact::{self, KeyArtifact};
use crate::credentials::SessionId;
use crate::error::{GatewayError, SshError};
use crate::gateway::protocol::{Event, EventSink};
use crate::ssh::{KeySource, ShellChannel, ShellTarget, ShellTransport};
use crate::validation;

pub use registry::{ActiveBridges, BridgeLease};

const NO_ACTIVE_SESSION: &str = "No active SSH session";
const SESSION_CLOSED: &str = "Session closed";

/// Lifecycle of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Connecting,
    Ready,
    Executing,
    Closed,
}

/// Settings a bridge needs from the gateway configuration
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub drain: DrainConfig,
    pub credential_mode: CredentialMode,
    pub credential_dir: PathBuf,
    pub default_port: u16,
}

impl BridgeSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            drain: config.drain.clone(),
            credential_mode: config.ssh.credential_mode,
            credential_dir: config.ssh.credential_dir(),
            default_port: config.ssh.default_port,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// An open shell together with the identity used for prompts
#[derive(Debug)]
pub struct ShellConnection<C> {
    pub hostname: String,
    pub username: String,
    pub port: u16,
    channel: C,
}

impl<C> ShellConnection<C> {
    fn prompt(&self) -> Event {
        Event::prompt(&self.username, &self.hostname)
    }
}

/// How a drain ended
enum DrainEnd {
    Complete,
    Failed(SshError),
}

pub struct ShellBridge<T: ShellTransport> {
    session_id: SessionId,
    transport: Arc<T>,
    settings: BridgeSettings,
    state: BridgeState,
    connection: Option<ShellConnection<T::Channel>>,
}

impl<T: ShellTransport> ShellBridge<T> {
    pub fn new(session_id: SessionId, transport: Arc<T>, settings: BridgeSettings) -> Self {
        Self {
            session_id,
            transport,
            settings,
            state: BridgeState::Idle,
            connection: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&ShellConnection<T::Channel>> {
        self.connection.as_ref()
    }

    /// Open a shell on `host` as `username` using the session's key material.
    ///
    /// Emits exactly one event: a prompt on success or an error otherwise.
    /// A previous connection is closed before the new attempt.
    pub async fn connect<S: EventSink>(
        &mut self,
        host: &str,
        username: &str,
        port: Option<u16>,
        key_material: &SecretString,
        sink: &mut S,
    ) -> Result<(), GatewayError> {
        if self.state == BridgeState::Closed {
            return sink.emit(Event::error(SESSION_CLOSED)).await;
        }

        let username = username.trim();
        let target = match validation::parse_target(host, port, self.settings.default_port)
            .and_then(|target| {
                validation::validate_username(username)?;
                Ok(target)
            }) {
            Ok(target) => ShellTarget {
                hostname: target.hostname,
                port: target.port,
                username: username.to_string(),
            },
            Err(e) => return sink.emit(Event::error(e.to_string())).await,
        };

        if let Some(mut previous) = self.connection.take() {
            tracing::info!(
                "Replacing connection to {}@{}:{}",
                previous.username,
                previous.hostname,
                previous.port
            );
            previous.channel.close().await;
        }

        self.state = BridgeState::Connecting;
        tracing::info!(
            "Session {} connecting to {}@{}:{}",
            self.session_id,
            target.username,
            target.hostname,
            target.port
        );

        match self.open(&target, key_material).await {
            Ok(channel) => {
                let connection = ShellConnection {
                    hostname: target.hostname,
                    username: target.username,
                    port: target.port,
                    channel,
                };
                let prompt = connection.prompt();
                self.connection = Some(connection);
                self.state = BridgeState::Ready;
                sink.emit(prompt).await
            }
            Err(e) => {
                tracing::warn!("Session {} connect failed: {}", self.session_id, e);
                self.state = BridgeState::Idle;
                sink.emit(Event::error(e.to_string())).await
            }
        }
    }

    async fn open(
        &self,
        target: &ShellTarget,
        key_material: &SecretString,
    ) -> Result<T::Channel, SshError> {
        match self.settings.credential_mode {
            CredentialMode::Memory => {
                self.transport
                    .open_shell(target, KeySource::Memory(key_material))
                    .await
            }
            CredentialMode::File => {
                let dir = &self.settings.credential_dir;
                artifact::ensure_credential_dir(dir).map_err(|e| {
                    SshError::KeyFile(format!("Cannot prepare credential directory: {}", e))
                })?;
                let artifact = KeyArtifact::create(dir, self.session_id, key_material)
                    .map_err(|e| SshError::KeyFile(format!("Cannot write key file: {}", e)))?;

                // The transport deletes the file once it has read the key
                self.transport
                    .open_shell(target, KeySource::File(artifact))
                    .await
            }
        }
    }

    /// Run one line in the shell and stream its output, ending with a prompt.
    ///
    /// Without a ready connection this emits a single error and nothing else.
    pub async fn execute<S: EventSink>(
        &mut self,
        command: &str,
        sink: &mut S,
    ) -> Result<(), GatewayError> {
        match self.state {
            BridgeState::Ready => {}
            BridgeState::Closed => return sink.emit(Event::error(SESSION_CLOSED)).await,
            _ => return sink.emit(Event::error(NO_ACTIVE_SESSION)).await,
        }
        let Some(connection) = self.connection.as_mut() else {
            self.state = BridgeState::Idle;
            return sink.emit(Event::error(NO_ACTIVE_SESSION)).await;
        };

        self.state = BridgeState::Executing;

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        let end = match connection.channel.send(line.as_bytes()).await {
            Ok(()) => {
                tokio::time::sleep(self.settings.drain.settle()).await;
                drain(&mut connection.channel, &self.settings.drain, sink).await?
            }
            Err(e) => DrainEnd::Failed(e),
        };

        match end {
            DrainEnd::Complete => {
                let prompt = connection.prompt();
                self.state = BridgeState::Ready;
                sink.emit(prompt).await
            }
            DrainEnd::Failed(e) => {
                tracing::warn!("Session {} lost its shell: {}", self.session_id, e);
                self.drop_connection().await;
                sink.emit(Event::error(e.to_string())).await
            }
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.channel.close().await;
        }
        if self.state != BridgeState::Closed {
            self.state = BridgeState::Idle;
        }
    }

    /// Close the shell if one is open. Further commands are refused.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            tracing::debug!(
                "Session {} closing shell on {}:{}",
                self.session_id,
                connection.hostname,
                connection.port
            );
            connection.channel.close().await;
        }
        self.state = BridgeState::Closed;
    }
}

/// Forward available output until the shell stays quiet.
async fn drain<C: ShellChannel, S: EventSink>(
    channel: &mut C,
    config: &DrainConfig,
    sink: &mut S,
) -> Result<DrainEnd, GatewayError> {
    let mut decoder = Utf8Carry::default();
    let mut idle = 0u32;
    let mut chunks = 0usize;

    let end = loop {
        match channel.try_recv(config.chunk_size) {
            Ok(Some(bytes)) => {
                idle = 0;
                let text = decoder.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                sink.emit(Event::Output(text)).await?;
                chunks += 1;
                if config.max_chunks > 0 && chunks >= config.max_chunks {
                    break DrainEnd::Complete;
                }
            }
            Ok(None) => {
                if idle >= config.idle_polls {
                    break DrainEnd::Complete;
                }
                idle += 1;
                tokio::time::sleep(config.poll_interval()).await;
            }
            Err(e) => break DrainEnd::Failed(e),
        }
    };

    let rest = decoder.finish();
    if !rest.is_empty() {
        sink.emit(Event::Output(rest)).await?;
    }
    Ok(end)
}

/// Incremental UTF-8 decoder that holds back an incomplete trailing sequence
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut input = self.pending.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(s) => {
                    out.push_str(s);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let carry = input.to_vec();
        self.pending = carry;
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
