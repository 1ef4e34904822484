use std::time::Duration;

use bytes::BytesMut;
use russh::client::Handle;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::SshError;

use super::ShellChannel;
use super::handler::ClientHandler;

/// How long `close` waits for the channel task to say goodbye
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands that can be sent to the channel task
enum ChannelCommand {
    Data(Vec<u8>, oneshot::Sender<Result<(), SshError>>),
    Close,
}

/// Active interactive shell on a russh connection.
///
/// A spawned task owns the russh channel and handle. Remote output is pushed
/// into an unbounded queue so [`ShellChannel::try_recv`] can check for
/// available bytes without waiting.
pub struct SshSession {
    command_tx: mpsc::Sender<ChannelCommand>,
    data_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: BytesMut,
    remote_closed: bool,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("pending", &self.pending.len())
            .field("remote_closed", &self.remote_closed)
            .finish()
    }
}

impl SshSession {
    /// Create a new session and spawn the channel I/O task
    pub fn new(handle: Handle<ClientHandler>, mut channel: Channel<russh::client::Msg>) -> Self {
        let (command_tx, mut command_rx) = mpsc::channel::<ChannelCommand>(64);
        let (data_tx, data_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) => {
                                if data_tx.send(data.to_vec()).is_err() {
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExtendedData { data, .. }) => {
                                if data_tx.send(data.to_vec()).is_err() {
                                    break;
                                }
                            }
                            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                                tracing::debug!("Remote shell closed");
                                break;
                            }
                            Some(ChannelMsg::ExitStatus { exit_status }) => {
                                tracing::debug!("Exit status: {}", exit_status);
                            }
                            Some(_) => {}
                        }
                    }
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(ChannelCommand::Data(data, reply)) => {
                                let result = channel
                                    .data(&data[..])
                                    .await
                                    .map_err(|e| SshError::Channel(e.to_string()));
                                let failed = result.is_err();
                                let _ = reply.send(result);
                                if failed {
                                    break;
                                }
                            }
                            Some(ChannelCommand::Close) | None => {
                                if let Err(e) = channel.close().await {
                                    tracing::debug!("Channel close failed: {}", e);
                                }
                                break;
                            }
                        }
                    }
                }
            }

            // Dropping data_tx here tells the reader the shell is gone
            drop(data_tx);
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "session closed", "en")
                .await
            {
                tracing::debug!("SSH disconnect failed: {}", e);
            }
        });

        Self {
            command_tx,
            data_rx,
            pending: BytesMut::new(),
            remote_closed: false,
            task: Some(task),
        }
    }

    fn fill_pending(&mut self, want: usize) {
        while self.pending.len() < want {
            match self.data_rx.try_recv() {
                Ok(data) => self.pending.extend_from_slice(&data),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.remote_closed = true;
                    break;
                }
            }
        }
    }
}

impl ShellChannel for SshSession {
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ChannelCommand::Data(data.to_vec(), reply_tx))
            .await
            .map_err(|_| SshError::ChannelClosed)?;

        reply_rx.await.map_err(|_| SshError::ChannelClosed)?
    }

    fn try_recv(&mut self, max: usize) -> Result<Option<Vec<u8>>, SshError> {
        self.fill_pending(max);

        if self.pending.is_empty() {
            return if self.remote_closed {
                Err(SshError::ChannelClosed)
            } else {
                Ok(None)
            };
        }

        let n = self.pending.len().min(max);
        Ok(Some(self.pending.split_to(n).to_vec()))
    }

    async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _ = self.command_tx.send(ChannelCommand::Close).await;
        match timeout(CLOSE_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("SSH channel task failed: {}", e),
            Err(_) => tracing::warn!("SSH channel task did not stop within {:?}", CLOSE_TIMEOUT),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        // Dropped without close(): stop the task so the connection does not linger
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
