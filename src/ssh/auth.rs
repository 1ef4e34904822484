use std::path::Path;
use std::sync::Arc;

use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg};
use secrecy::ExposeSecret;

use crate::error::SshError;

use super::KeySource;

/// Load the private key for public key authentication.
///
/// A file source is removed before this returns, whether or not it parsed.
pub fn load_key(source: KeySource<'_>) -> Result<PrivateKeyWithHashAlg, SshError> {
    let key = match source {
        KeySource::Memory(material) => decode_key(material.expose_secret())?,
        KeySource::File(artifact) => {
            let loaded = load_key_file(artifact.path());
            drop(artifact);
            loaded?
        }
    };

    // Only use SHA-512 hash algorithm for RSA keys
    // ED25519 and other keys use their native signing algorithms
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };

    Ok(PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
}

fn decode_key(pem: &str) -> Result<PrivateKey, SshError> {
    check_private_key_text(pem, "session key")?;
    russh::keys::decode_secret_key(pem, None)
        .map_err(|e| SshError::KeyFile(format!("Failed to decode session key: {}", e)))
}

fn load_key_file(path: &Path) -> Result<PrivateKey, SshError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SshError::KeyFile(format!("Cannot read key file {}: {}", path.display(), e))
    })?;
    check_private_key_text(&content, &path.display().to_string())?;

    russh::keys::load_secret_key(path, None)
        .map_err(|e| SshError::KeyFile(format!("Failed to load key {}: {}", path.display(), e)))
}

fn check_private_key_text(content: &str, what: &str) -> Result<(), SshError> {
    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(SshError::KeyFile(format!(
            "{} contains a PUBLIC key, not a private key",
            what
        )));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(SshError::KeyFile(format!(
            "{} does not appear to be a valid SSH private key",
            what
        )));
    }

    Ok(())
}
