//! Common test utilities
//!
//! A scripted in-process [`ShellTransport`] and a WebSocket harness that runs
//! a [`SessionGateway`] over an in-memory duplex stream.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

use keygate::app::AppState;
use keygate::config::{CredentialMode, GatewayConfig};
use keygate::credentials::SessionId;
use keygate::error::{GatewayError, SshError};
use keygate::gateway::SessionGateway;
use keygate::gateway::protocol::Event;
use keygate::ssh::{KeySource, ShellChannel, ShellTarget, ShellTransport};

pub type ClientSocket = WebSocketStream<DuplexStream>;

/// How long a test waits for a single event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct FakeState {
    responses: HashMap<String, Vec<Vec<u8>>>,
    rejected_users: HashSet<String>,
    opened: Vec<ShellTarget>,
    key_files: Vec<(PathBuf, bool)>,
    sent: Vec<String>,
    open_channels: usize,
    closed_channels: usize,
}

/// Scripted transport: each command line maps to a list of output chunks
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output chunks produced when `command` is written to the shell
    pub fn respond(&self, command: &str, chunks: &[&[u8]]) -> &Self {
        self.state.lock().responses.insert(
            command.to_string(),
            chunks.iter().map(|c| c.to_vec()).collect(),
        );
        self
    }

    /// Authentication as `username` fails
    pub fn reject_user(&self, username: &str) -> &Self {
        self.state.lock().rejected_users.insert(username.to_string());
        self
    }

    pub fn opened(&self) -> Vec<ShellTarget> {
        self.state.lock().opened.clone()
    }

    /// Key file paths handed to the transport, with whether each existed at the time
    pub fn key_files(&self) -> Vec<(PathBuf, bool)> {
        self.state.lock().key_files.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().open_channels
    }

    pub fn closed_channels(&self) -> usize {
        self.state.lock().closed_channels
    }
}

impl ShellTransport for FakeTransport {
    type Channel = FakeChannel;

    async fn open_shell(
        &self,
        target: &ShellTarget,
        key: KeySource<'_>,
    ) -> Result<FakeChannel, SshError> {
        let mut state = self.state.lock();
        if let KeySource::File(artifact) = &key {
            let path = artifact.path();
            state.key_files.push((path.to_path_buf(), path.exists()));
        }
        drop(key);
        state.opened.push(target.clone());

        if state.rejected_users.contains(&target.username) {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        state.open_channels += 1;
        Ok(FakeChannel {
            state: self.state.clone(),
            pending: VecDeque::new(),
            closed: false,
        })
    }
}

pub struct FakeChannel {
    state: Arc<Mutex<FakeState>>,
    pending: VecDeque<Vec<u8>>,
    closed: bool,
}

impl ShellChannel for FakeChannel {
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        if self.closed {
            return Err(SshError::ChannelClosed);
        }
        let line = String::from_utf8_lossy(data).into_owned();
        let command = line.trim_end_matches('\n').to_string();

        let mut state = self.state.lock();
        state.sent.push(line);
        if let Some(chunks) = state.responses.get(&command) {
            self.pending.extend(chunks.iter().cloned());
        }
        Ok(())
    }

    fn try_recv(&mut self, max: usize) -> Result<Option<Vec<u8>>, SshError> {
        match self.pending.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max {
                    let rest = chunk.split_off(max);
                    self.pending.push_front(rest);
                }
                Ok(Some(chunk))
            }
            None if self.closed => Err(SshError::ChannelClosed),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.state.lock();
            state.open_channels -= 1;
            state.closed_channels += 1;
        }
    }
}

/// Gateway configuration that keeps tests fast
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.drain.settle_ms = 10;
    config
}

/// Shared state plus the transport handle and a private credential dir
pub struct TestGateway {
    pub state: Arc<AppState<FakeTransport>>,
    pub transport: FakeTransport,
    pub credential_dir: TempDir,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn file_mode() -> Self {
        let mut config = test_config();
        config.ssh.credential_mode = CredentialMode::File;
        Self::with_config(config)
    }

    pub fn with_config(mut config: GatewayConfig) -> Self {
        let credential_dir = TempDir::new().expect("Failed to create temp dir");
        config.ssh.credential_dir = Some(credential_dir.path().to_path_buf());

        let transport = FakeTransport::new();
        let state = Arc::new(AppState::new(config, transport.clone()));
        Self {
            state,
            transport,
            credential_dir,
        }
    }

    pub fn provision(&self) -> SessionId {
        self.state
            .provision()
            .expect("Key provisioning failed")
            .session_id
    }

    /// Admit a gateway for `session_id` and run it over an in-memory socket.
    pub async fn open(&self, session_id: SessionId) -> (ClientSocket, JoinHandle<Result<(), GatewayError>>) {
        let gateway =
            SessionGateway::admit(self.state.clone(), session_id).expect("Session refused");
        let (client, server) = socket_pair().await;
        let handle = tokio::spawn(gateway.run(server));
        (client, handle)
    }

    pub fn credential_files(&self) -> usize {
        std::fs::read_dir(self.credential_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Connected client/server WebSocket pair over `tokio::io::duplex`
pub async fn socket_pair() -> (ClientSocket, WebSocketStream<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (client, server)
}

pub async fn send_json(client: &mut ClientSocket, json: serde_json::Value) {
    client
        .send(Message::Text(json.to_string()))
        .await
        .expect("Failed to send command");
}

pub async fn connect(client: &mut ClientSocket, host: &str, username: &str) {
    send_json(
        client,
        serde_json::json!({"command": "connect", "host": host, "username": username}),
    )
    .await;
}

pub async fn execute(client: &mut ClientSocket, args: &str) {
    send_json(client, serde_json::json!({"command": "execute", "args": args})).await;
}

/// Next event from the gateway, or `None` once the socket closed
pub async fn next_event(client: &mut ClientSocket) -> Option<Event> {
    loop {
        let message = tokio::time::timeout(EVENT_TIMEOUT, client.next())
            .await
            .expect("Timed out waiting for event")?;
        match message {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("Invalid event JSON"));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Events up to and including the next prompt or error
pub async fn events_until_prompt(client: &mut ClientSocket) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = next_event(client).await {
        let done = matches!(event, Event::Prompt(_) | Event::Error(_));
        events.push(event);
        if done {
            break;
        }
    }
    events
}

/// Wait for a spawned gateway to finish
pub async fn finished(
    handle: JoinHandle<Result<(), GatewayError>>,
) -> Result<(), GatewayError> {
    tokio::time::timeout(EVENT_TIMEOUT, handle)
        .await
        .expect("Gateway did not terminate")
        .expect("Gateway task panicked")
}
