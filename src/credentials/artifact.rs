//! Temporary on-disk credential files.
//!
//! Some transports only accept a path to a private key. A [`KeyArtifact`]
//! holds such a file for the duration of a single connect attempt and removes
//! it when dropped, so no return path can leave it behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::security_log;

use super::SessionId;

/// Owner-only private key file that is deleted on drop
#[derive(Debug)]
pub struct KeyArtifact {
    session_id: SessionId,
    path: PathBuf,
}

impl KeyArtifact {
    /// Path of the artifact for a session inside `dir`
    pub fn path_for(dir: &Path, session_id: SessionId) -> PathBuf {
        dir.join(format!("id_ed25519_{}", session_id))
    }

    /// Write the key material to `<dir>/id_ed25519_<session>` readable only by the owner.
    pub fn create(
        dir: &Path,
        session_id: SessionId,
        key_material: &SecretString,
    ) -> std::io::Result<Self> {
        let path = Self::path_for(dir, session_id);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        // Guard first so a failed write still removes the partial file
        let artifact = Self { session_id, path };
        let mut file = options.open(&artifact.path)?;

        // A stale file from an earlier run may predate the mode above
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(key_material.expose_secret().as_bytes())?;
        file.sync_all()?;

        security_log::log_artifact_created(session_id, &artifact.path);
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a leftover artifact for a session, if one exists.
    ///
    /// Returns `Ok(true)` when a file was removed.
    pub fn remove_stale(dir: &Path, session_id: SessionId) -> std::io::Result<bool> {
        let path = Self::path_for(dir, session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                security_log::log_artifact_removed(session_id, &path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for KeyArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => security_log::log_artifact_removed(self.session_id, &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    "Failed to remove credential file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Ensure the credential directory exists with owner-only permissions
pub fn ensure_credential_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}
