use std::future::Future;

use russh::ChannelId;
use russh::client::{Handler, Session};
use russh::keys::{HashAlg, PublicKey};

use crate::error::SshError;
use crate::security_log;

/// SSH client handler implementation.
///
/// The gateway has no interactive user to confirm unknown host keys, so every
/// server key is accepted and its fingerprint recorded in the security log.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let key_type = server_public_key.algorithm().as_str().to_string();
        security_log::log_host_key_accepted(&self.host, self.port, &fingerprint, &key_type);

        async move { Ok(true) }
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel {:?} EOF from {}:{}", channel, self.host, self.port);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel {:?} closed by {}:{}", channel, self.host, self.port);
        Ok(())
    }
}
