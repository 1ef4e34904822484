//! Ephemeral credential lifecycle
//!
//! Generates per-session Ed25519 key pairs, keeps the private half in the
//! [`SessionStore`] and hands only the public half back to the caller.

pub mod artifact;
pub mod store;

use rand::rngs::OsRng;
use secrecy::SecretString;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey};

use crate::error::ProvisionError;
use crate::security_log;

pub use artifact::KeyArtifact;
pub use store::SessionStore;

/// Opaque session identifier (128-bit random UUID v4)
pub type SessionId = uuid::Uuid;

/// A freshly generated key pair
pub struct KeyPair {
    /// Single-line authorized-key text: `ssh-ed25519 <base64> <comment>`
    pub public_key: String,
    /// Unencrypted OpenSSH private key PEM
    pub private_key: SecretString,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new Ed25519 key pair without a passphrase
    pub fn generate(comment: &str) -> Result<Self, ProvisionError> {
        let mut private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(|e| ProvisionError::KeyGeneration(e.to_string()))?;
        private.set_comment(comment);

        let pem = private.to_openssh(LineEnding::LF)?;
        let public_key = private.public_key().to_openssh()?;

        Ok(Self {
            public_key,
            private_key: SecretString::from(pem.as_str()),
        })
    }

    /// SHA-256 fingerprint of the public half (`SHA256:...`)
    pub fn fingerprint(&self) -> Result<String, ProvisionError> {
        let public = ssh_key::PublicKey::from_openssh(&self.public_key)?;
        Ok(public.fingerprint(HashAlg::Sha256).to_string())
    }
}

/// Result of a provisioning request
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub public_key: String,
    pub session_id: SessionId,
}

/// Generate a key pair, store its private half and return the public half with
/// the new session id.
pub fn provision(store: &SessionStore, key_comment: &str) -> Result<Provisioned, ProvisionError> {
    let key_pair = KeyPair::generate(key_comment)?;
    let fingerprint = key_pair.fingerprint()?;

    let KeyPair {
        public_key,
        private_key,
    } = key_pair;
    let session_id = store.insert_new(private_key);
    security_log::log_key_provisioned(session_id, &fingerprint);

    Ok(Provisioned {
        public_key,
        session_id,
    })
}
