//! Session gateway: the protocol loop for one WebSocket connection
//!
//! A gateway is admitted for a known session id, serves commands strictly one
//! at a time and always tears down the bridge, the registry entry, any key
//! file and the stored key material when the connection ends.

pub mod protocol;

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::app::AppState;
use crate::bridge::{BridgeLease, ShellBridge};
use crate::credentials::{KeyArtifact, SessionId};
use crate::error::GatewayError;
use crate::security_log;
use crate::ssh::ShellTransport;

use protocol::{Command, Event, EventSink, WsEventSink};

/// Parse the session id segment of `/ws/{session_id}`
pub fn parse_session_id(segment: &str) -> Result<SessionId, GatewayError> {
    SessionId::parse_str(segment.trim()).map_err(|_| GatewayError::UnknownSession(segment.to_string()))
}

/// Close frame sent to refused connections
pub fn policy_violation(reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Policy,
        reason: reason.to_string().into(),
    }
}

/// Accept the socket and immediately close it with a policy violation.
pub async fn refuse<S>(ws: S, reason: &str)
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    let mut sink = WsEventSink::new(ws);
    sink.close(Some(policy_violation(reason))).await;
}

pub struct SessionGateway<T: ShellTransport> {
    session_id: SessionId,
    state: Arc<AppState<T>>,
    bridge: ShellBridge<T>,
    lease: BridgeLease,
    torn_down: bool,
}

impl<T: ShellTransport> SessionGateway<T> {
    /// Admit a connection for `session_id`.
    ///
    /// Unknown ids and ids that already have a live gateway are refused before
    /// a bridge is allocated.
    pub fn admit(state: Arc<AppState<T>>, session_id: SessionId) -> Result<Self, GatewayError> {
        if !state.store.contains(session_id) {
            security_log::log_session_refused(&session_id.to_string(), "unknown session");
            return Err(GatewayError::UnknownSession(session_id.to_string()));
        }

        let lease = state.bridges.register(session_id).inspect_err(|_| {
            security_log::log_session_refused(&session_id.to_string(), "bridge already active");
        })?;

        let bridge = ShellBridge::new(
            session_id,
            state.transport.clone(),
            state.bridge_settings.clone(),
        );
        tracing::info!("Session {} attached", session_id);

        Ok(Self {
            session_id,
            state,
            bridge,
            lease,
            torn_down: false,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Serve the connection until the client leaves, then tear down.
    pub async fn run<S>(mut self, ws: S) -> Result<(), GatewayError>
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send,
    {
        let (sink, inbound) = ws.split();
        let mut sink = WsEventSink::new(sink);

        let outcome = self.serve(&mut sink, inbound).await;
        match &outcome {
            Err(e @ GatewayError::Decode(_)) => {
                tracing::warn!("Session {} sent an invalid message: {}", self.session_id, e);
                let _ = sink.emit(Event::error(e.to_string())).await;
            }
            Err(e @ GatewayError::QueueFull(_)) => {
                tracing::warn!("Session {} overran its command queue", self.session_id);
                let _ = sink.emit(Event::error(e.to_string())).await;
            }
            _ => {}
        }

        self.teardown().await;
        sink.close(None).await;
        outcome
    }

    /// Process commands one at a time until the inbound stream ends.
    ///
    /// The inbound stream is still read while a command runs so a disconnect
    /// or shutdown request can drop it. Frames that arrive meanwhile are
    /// queued undecoded, so a malformed frame only ends the connection once
    /// every command before it has finished. Once `session.max_queued_commands`
    /// frames are waiting, the next one stops reading; the running command
    /// completes and the connection ends with [`GatewayError::QueueFull`].
    pub async fn serve<K, R>(&mut self, sink: &mut K, mut inbound: R) -> Result<(), GatewayError>
    where
        K: EventSink,
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
    {
        let limit = self.state.config.session.max_queued_commands;
        let mut queued: VecDeque<Message> = VecDeque::new();
        let mut lease = self.lease.clone();

        loop {
            let message = match queued.pop_front() {
                Some(message) => message,
                None => tokio::select! {
                    next = next_frame(&mut inbound) => match next? {
                        Some(message) => message,
                        None => return Ok(()),
                    },
                    _ = lease.shutdown_requested() => {
                        tracing::info!("Session {} stopping for shutdown", self.session_id);
                        return Ok(());
                    }
                },
            };

            let Some(command) = Command::from_message(&message)? else {
                continue;
            };

            let work = dispatch(&mut self.bridge, &self.state, self.session_id, command, sink);
            tokio::pin!(work);
            let mut overrun = false;

            loop {
                tokio::select! {
                    biased;
                    done = &mut work => {
                        done?;
                        break;
                    }
                    next = next_frame(&mut inbound), if !overrun => match next? {
                        Some(message) if queued.len() < limit => queued.push_back(message),
                        Some(_) => overrun = true,
                        None => {
                            tracing::debug!("Session {} disconnected mid-command", self.session_id);
                            return Ok(());
                        }
                    },
                    _ = lease.shutdown_requested() => {
                        tracing::info!("Session {} stopping for shutdown", self.session_id);
                        return Ok(());
                    }
                }
            }

            if overrun {
                return Err(GatewayError::QueueFull(limit));
            }
        }
    }

    /// Release everything the session holds. Each step runs even if an
    /// earlier one failed; calling this again does nothing.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.bridge.close().await;
        self.release();
    }

    fn release(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if !self.state.bridges.deregister(self.session_id) {
            tracing::warn!("Session {} was not registered at teardown", self.session_id);
        }

        if let Err(e) =
            KeyArtifact::remove_stale(&self.state.bridge_settings.credential_dir, self.session_id)
        {
            tracing::error!(
                "Failed to remove credential file for session {}: {}",
                self.session_id,
                e
            );
        }

        let purged = self.state.store.remove(self.session_id);
        security_log::log_session_torn_down(self.session_id, purged);
    }
}

impl<T: ShellTransport> Drop for SessionGateway<T> {
    fn drop(&mut self) {
        // Dropping the bridge drops its channel, which stops the transport
        self.release();
    }
}

/// Read the next data frame, skipping control frames.
///
/// Returns `Ok(None)` when the client has gone away.
async fn next_frame<R>(inbound: &mut R) -> Result<Option<Message>, GatewayError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Close(_)) => return Ok(None),
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => return Ok(Some(message)),
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
            Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

async fn dispatch<T, K>(
    bridge: &mut ShellBridge<T>,
    state: &AppState<T>,
    session_id: SessionId,
    command: Command,
    sink: &mut K,
) -> Result<(), GatewayError>
where
    T: ShellTransport,
    K: EventSink,
{
    match command {
        Command::Connect {
            host,
            username,
            port,
        } => match state.store.take(session_id) {
            Ok(key_material) => {
                bridge
                    .connect(&host, &username, port, &key_material, sink)
                    .await
            }
            Err(e) => sink.emit(Event::error(e.to_string())).await,
        },
        Command::Execute { args } => bridge.execute(&args, sink).await,
    }
}
