//! Process-wide gateway state
//!
//! Created once at startup and shared by reference with every HTTP handler
//! and session gateway.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::bridge::{ActiveBridges, BridgeSettings};
use crate::config::GatewayConfig;
use crate::credentials::{self, KeyArtifact, Provisioned, SessionStore};
use crate::error::ProvisionError;
use crate::security_log;
use crate::ssh::{ShellTransport, SshClient};

/// Shortest sweep period for unclaimed sessions
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct AppState<T: ShellTransport = SshClient> {
    pub config: GatewayConfig,
    pub store: SessionStore,
    pub bridges: ActiveBridges,
    pub transport: Arc<T>,
    pub bridge_settings: BridgeSettings,
}

impl<T: ShellTransport> AppState<T> {
    pub fn new(config: GatewayConfig, transport: T) -> Self {
        let bridge_settings = BridgeSettings::from_config(&config);
        Self {
            config,
            store: SessionStore::new(),
            bridges: ActiveBridges::new(),
            transport: Arc::new(transport),
            bridge_settings,
        }
    }

    /// Generate a key pair for a new session
    pub fn provision(&self) -> Result<Provisioned, ProvisionError> {
        credentials::provision(&self.store, &self.config.ssh.key_comment)
    }

    /// Purge sessions provisioned longer than `ttl` ago that never attached a bridge.
    pub fn purge_unclaimed(&self, ttl: Duration) -> usize {
        let purged = self
            .store
            .purge_expired(ttl, |id| self.bridges.contains(id));

        for id in &purged {
            if let Err(e) = KeyArtifact::remove_stale(&self.bridge_settings.credential_dir, *id) {
                tracing::error!("Failed to remove credential file for {}: {}", id, e);
            }
            security_log::log_session_expired(*id);
        }
        purged.len()
    }

    /// Start the unclaimed-session sweeper. Returns `None` when the TTL is zero.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl_secs = self.config.session.unclaimed_ttl_secs;
        if ttl_secs == 0 {
            tracing::info!("Unclaimed session expiry disabled");
            return None;
        }

        let ttl = Duration::from_secs(ttl_secs);
        let period = (ttl / 4).max(MIN_SWEEP_INTERVAL);
        let state = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let purged = state.purge_unclaimed(ttl);
                if purged > 0 {
                    tracing::info!("Expired {} unclaimed session(s)", purged);
                }
            }
        }))
    }
}
