//! Security event logging for audit trails.
//!
//! Provides structured logging functions for security-relevant events such as
//! key provisioning, session refusal, authentication attempts and credential
//! file lifetime.
//!
//! All security events are logged with `target: "security"` to allow filtering
//! in production environments. Private key material is never logged.
//!
//! # Example
//!
//! Filter security events only:
//! ```bash
//! RUST_LOG=security=info cargo run
//! ```

use std::path::Path;

use tracing::{info, warn};

use crate::credentials::SessionId;

/// Tracing target shared by every event in this module
pub const TARGET: &str = "security";

/// Log a newly provisioned session key.
pub fn log_key_provisioned(session_id: SessionId, fingerprint: &str) {
    info!(
        target: "security",
        event = "key_provisioned",
        session = %session_id,
        fingerprint = %fingerprint,
        "Ephemeral key pair provisioned"
    );
}

/// Log a connection refused because its session id is unknown.
pub fn log_session_refused(session: &str, reason: &str) {
    warn!(
        target: "security",
        event = "session_refused",
        session = %session,
        reason = %reason,
        "Session connection refused"
    );
}

/// Log an SSH authentication attempt.
///
/// Called before attempting to authenticate with a remote host.
pub fn log_auth_attempt(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_attempt",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication attempt"
    );
}

/// Log a successful SSH authentication.
pub fn log_auth_success(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_success",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication succeeded"
    );
}

/// Log a failed SSH authentication attempt.
pub fn log_auth_failure(host: &str, port: u16, username: &str, method: &str, reason: &str) {
    warn!(
        target: "security",
        event = "auth_failure",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        reason = %reason,
        "SSH authentication failed"
    );
}

/// Log a server host key accepted without prior knowledge.
pub fn log_host_key_accepted(host: &str, port: u16, fingerprint: &str, key_type: &str) {
    info!(
        target: "security",
        event = "host_key_accepted",
        host = %host,
        port = port,
        fingerprint = %fingerprint,
        key_type = %key_type,
        "Accepted server host key"
    );
}

/// Log creation of a temporary credential file.
pub fn log_artifact_created(session_id: SessionId, path: &Path) {
    info!(
        target: "security",
        event = "artifact_created",
        session = %session_id,
        path = %path.display(),
        "Temporary credential file created"
    );
}

/// Log removal of a temporary credential file.
pub fn log_artifact_removed(session_id: SessionId, path: &Path) {
    info!(
        target: "security",
        event = "artifact_removed",
        session = %session_id,
        path = %path.display(),
        "Temporary credential file removed"
    );
}

/// Log the end of a session and whether its credential was purged.
pub fn log_session_torn_down(session_id: SessionId, key_purged: bool) {
    info!(
        target: "security",
        event = "session_torn_down",
        session = %session_id,
        key_purged = key_purged,
        "Session torn down"
    );
}

/// Log a provisioned session purged before any connection claimed it.
pub fn log_session_expired(session_id: SessionId) {
    info!(
        target: "security",
        event = "session_expired",
        session = %session_id,
        "Unclaimed session expired"
    );
}
