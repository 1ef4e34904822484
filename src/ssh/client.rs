use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Config};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::SshDefaults;
use crate::error::SshError;
use crate::security_log;

use super::auth;
use super::handler::ClientHandler;
use super::session::SshSession;
use super::{KeySource, ShellTarget, ShellTransport};

/// SSH client for establishing interactive shell connections
pub struct SshClient {
    config: Arc<Config>,
    connection_timeout: Duration,
    terminal_size: (u16, u16),
}

impl SshClient {
    pub fn new(connection_timeout: u64, keepalive_interval: u64) -> Self {
        // Treat 0 as "no keepalive" to avoid immediate timeout
        let keepalive = if keepalive_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(keepalive_interval))
        };

        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keepalive_interval: keepalive,
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            connection_timeout: Duration::from_secs(connection_timeout),
            terminal_size: (80, 24),
        }
    }

    pub fn from_settings(ssh: &SshDefaults) -> Self {
        Self::new(ssh.connection_timeout_secs, ssh.keepalive_interval_secs)
            .with_terminal_size(ssh.terminal_cols, ssh.terminal_rows)
    }

    pub fn with_terminal_size(mut self, cols: u16, rows: u16) -> Self {
        self.terminal_size = (cols, rows);
        self
    }

    /// Connect, authenticate and open an interactive PTY shell
    pub async fn connect(
        &self,
        target: &ShellTarget,
        key: KeySource<'_>,
    ) -> Result<SshSession, SshError> {
        // A file source is deleted here, before any network I/O
        let key = auth::load_key(key)?;
        let addr = format!("{}:{}", target.hostname, target.port);

        // Connect with timeout
        let stream = timeout(self.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SshError::Timeout(addr.clone()))?
            .map_err(|e| SshError::ConnectionFailed {
                host: target.hostname.clone(),
                port: target.port,
                reason: e.to_string(),
            })?;

        match timeout(
            self.connection_timeout,
            self.establish_session(target, stream, key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(addr)),
        }
    }

    async fn establish_session(
        &self,
        target: &ShellTarget,
        stream: TcpStream,
        key: PrivateKeyWithHashAlg,
    ) -> Result<SshSession, SshError> {
        let handler = ClientHandler::new(target.hostname.clone(), target.port);

        let mut handle = client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed {
                host: target.hostname.clone(),
                port: target.port,
                reason: e.to_string(),
            })?;

        self.authenticate(&mut handle, target, key).await?;

        // Open channel and request PTY
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        channel
            .request_pty(
                false,
                "xterm",
                self.terminal_size.0 as u32,
                self.terminal_size.1 as u32,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SshError::Channel(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::Channel(format!("Shell request failed: {}", e)))?;

        Ok(SshSession::new(handle, channel))
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        target: &ShellTarget,
        key: PrivateKeyWithHashAlg,
    ) -> Result<(), SshError> {
        let method_name = "publickey";
        security_log::log_auth_attempt(&target.hostname, target.port, &target.username, method_name);

        let auth_result = match handle
            .authenticate_publickey(target.username.as_str(), key)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let reason = e.to_string();
                security_log::log_auth_failure(
                    &target.hostname,
                    target.port,
                    &target.username,
                    method_name,
                    &reason,
                );
                return Err(SshError::AuthenticationFailed(reason));
            }
        };

        if !auth_result.success() {
            let reason = "Authentication rejected by server";
            security_log::log_auth_failure(
                &target.hostname,
                target.port,
                &target.username,
                method_name,
                reason,
            );
            return Err(SshError::AuthenticationFailed(reason.to_string()));
        }

        security_log::log_auth_success(&target.hostname, target.port, &target.username, method_name);
        Ok(())
    }
}

impl ShellTransport for SshClient {
    type Channel = SshSession;

    async fn open_shell(
        &self,
        target: &ShellTarget,
        key: KeySource<'_>,
    ) -> Result<SshSession, SshError> {
        self.connect(target, key).await
    }
}

impl Default for SshClient {
    fn default() -> Self {
        Self::new(30, 60)
    }
}
