//! JSON message protocol for the session WebSocket
//!
//! Inbound:
//! ```json
//! {"command": "connect", "host": "example.com", "username": "deploy"}
//! {"command": "execute", "args": "ls -la"}
//! ```
//!
//! Outbound:
//! ```json
//! {"type": "output" | "prompt" | "error", "content": "..."}
//! ```

use std::future::Future;

use futures::{Sink, SinkExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::GatewayError;

/// Command sent by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Open a shell on `host` as `username`
    Connect {
        host: String,
        username: String,
        /// Overrides a port embedded in `host` and the configured default
        #[serde(default)]
        port: Option<u16>,
    },
    /// Run a line in the shell; an empty line only collects pending output
    Execute {
        #[serde(default)]
        args: String,
    },
}

impl Command {
    /// Decode a WebSocket frame. Returns `None` for frames that carry no command.
    pub fn from_message(message: &Message) -> Result<Option<Self>, GatewayError> {
        match message {
            Message::Text(text) => Ok(Some(serde_json::from_str(text)?)),
            Message::Binary(data) => Ok(Some(serde_json::from_slice(data)?)),
            _ => Ok(None),
        }
    }
}

/// Event streamed back to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Event {
    /// Raw shell output
    Output(String),
    /// Synthetic `user@host:~$` prompt
    Prompt(String),
    /// Recoverable failure description
    Error(String),
}

impl Event {
    pub fn prompt(username: &str, hostname: &str) -> Self {
        Event::Prompt(format!("{}@{}:~$", username, hostname))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error(message.into())
    }

    pub fn content(&self) -> &str {
        match self {
            Event::Output(content) | Event::Prompt(content) | Event::Error(content) => content,
        }
    }

    pub fn to_message(&self) -> Result<Message, GatewayError> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Destination for events produced while handling a command.
pub trait EventSink: Send {
    fn emit(&mut self, event: Event) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

impl EventSink for Vec<Event> {
    async fn emit(&mut self, event: Event) -> Result<(), GatewayError> {
        self.push(event);
        Ok(())
    }
}

/// Writes events as JSON text frames to a WebSocket sink
pub struct WsEventSink<S> {
    inner: S,
}

impl<S> WsEventSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Send a close frame; errors are ignored since the peer may be gone.
    pub async fn close(&mut self, frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame<'static>>) {
        let _ = self.inner.send(Message::Close(frame)).await;
        let _ = self.inner.close().await;
    }
}

impl<S> EventSink for WsEventSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn emit(&mut self, event: Event) -> Result<(), GatewayError> {
        let message = event.to_message()?;
        self.inner.send(message).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => GatewayError::ClientGone,
            other => GatewayError::WebSocket(other),
        })
    }
}
