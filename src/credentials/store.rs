//! In-memory session store.
//!
//! The only place private key material lives before it is handed to a
//! shell bridge. Nothing is persisted: a restart invalidates every
//! outstanding session.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};

use crate::error::StoreError;

use super::SessionId;

/// Stored private key material for one session
struct SessionEntry {
    key_material: SecretString,
    created_at: DateTime<Utc>,
}

/// Thread-safe mapping from session id to private key material.
///
/// Every operation touches the map under a single lock acquisition, so callers
/// never observe a partially written entry.
pub struct SessionStore {
    entries: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store key material under an explicit id, replacing any previous entry.
    pub fn put(&self, id: SessionId, key_material: SecretString) {
        self.entries.write().insert(
            id,
            SessionEntry {
                key_material,
                created_at: Utc::now(),
            },
        );
    }

    /// Store key material under a freshly allocated id that is not in use.
    pub fn insert_new(&self, key_material: SecretString) -> SessionId {
        let mut entries = self.entries.write();
        loop {
            let id = uuid::Uuid::new_v4();
            if let Entry::Vacant(slot) = entries.entry(id) {
                slot.insert(SessionEntry {
                    key_material,
                    created_at: Utc::now(),
                });
                return id;
            }
        }
    }

    /// Get a copy of the key material for a session.
    ///
    /// Does not consume the entry; a session may reconnect with the same key.
    pub fn take(&self, id: SessionId) -> Result<SecretString, StoreError> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| SecretString::from(entry.key_material.expose_secret()))
            .ok_or(StoreError::NotFound(id))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Remove a session, returning whether it was present.
    pub fn remove(&self, id: SessionId) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn created_at(&self, id: SessionId) -> Option<DateTime<Utc>> {
        self.entries.read().get(&id).map(|entry| entry.created_at)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove entries older than `ttl` for which `keep` returns false.
    ///
    /// Returns the ids that were purged.
    pub fn purge_expired(&self, ttl: Duration, keep: impl Fn(SessionId) -> bool) -> Vec<SessionId> {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Vec::new();
        };
        let mut purged = Vec::new();

        self.entries.write().retain(|id, entry| {
            if entry.created_at <= cutoff && !keep(*id) {
                purged.push(*id);
                false
            } else {
                true
            }
        });

        purged
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
