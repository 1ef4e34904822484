//! Registry of live bridges keyed by session id

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::credentials::SessionId;
use crate::error::GatewayError;

struct BridgeEntry {
    opened_at: DateTime<Utc>,
    shutdown: watch::Sender<bool>,
}

/// Handed to the gateway that owns a registered bridge
#[derive(Debug, Clone)]
pub struct BridgeLease {
    session_id: SessionId,
    shutdown: watch::Receiver<bool>,
}

impl BridgeLease {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Resolves once shutdown was requested for this bridge.
    ///
    /// Never resolves if the registry entry is removed without a request.
    pub async fn shutdown_requested(&mut self) {
        if self.shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Every session id with a gateway currently attached
#[derive(Default)]
pub struct ActiveBridges {
    entries: RwLock<HashMap<SessionId, BridgeEntry>>,
}

impl ActiveBridges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` for one gateway. A second claim is refused.
    pub fn register(&self, session_id: SessionId) -> Result<BridgeLease, GatewayError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&session_id) {
            return Err(GatewayError::AlreadyActive(session_id));
        }

        let (shutdown, receiver) = watch::channel(false);
        entries.insert(
            session_id,
            BridgeEntry {
                opened_at: Utc::now(),
                shutdown,
            },
        );

        Ok(BridgeLease {
            session_id,
            shutdown: receiver,
        })
    }

    pub fn deregister(&self, session_id: SessionId) -> bool {
        self.entries.write().remove(&session_id).is_some()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.entries.read().contains_key(&session_id)
    }

    pub fn opened_at(&self, session_id: SessionId) -> Option<DateTime<Utc>> {
        self.entries.read().get(&session_id).map(|e| e.opened_at)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ask one gateway to stop. Returns false if the id is not registered.
    pub fn shutdown(&self, session_id: SessionId) -> bool {
        match self.entries.read().get(&session_id) {
            Some(entry) => {
                entry.shutdown.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Ask every gateway to stop; each one deregisters itself during teardown.
    pub fn shutdown_all(&self) -> usize {
        let entries = self.entries.read();
        for entry in entries.values() {
            entry.shutdown.send_replace(true);
        }
        entries.len()
    }
}
