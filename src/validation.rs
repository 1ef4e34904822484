//! Validation of client-supplied connection targets.
//!
//! `connect` commands arrive straight from the browser, so host, port and
//! username are checked before any transport work or credential handling.

use std::net::IpAddr;

use regex::Regex;
use std::sync::LazyLock;

/// Validation error with field context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

// Pre-compiled regex patterns for validation
static DNS_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap());

// Whatever the remote sshd will look up: no whitespace or control
// characters, and no leading hyphen
static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s\p{Cc}-][^\s\p{Cc}]*$").unwrap());

const MAX_USERNAME_LEN: usize = 256;

/// A validated connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub hostname: String,
    pub port: u16,
}

/// Resolve a `connect` host field into hostname and port.
///
/// The host may carry its own port (`example.com:2222`, `[::1]:2222`).
/// An explicit `port` wins over an embedded one; otherwise `default_port` is used.
pub fn parse_target(
    host: &str,
    port: Option<u16>,
    default_port: u16,
) -> Result<Target, ValidationError> {
    let host = host.trim();
    let (hostname, embedded_port) = split_host_port(host)?;

    validate_hostname(hostname)?;

    let port = port.or(embedded_port).unwrap_or(default_port);
    if port == 0 {
        return Err(ValidationError::new(
            "port",
            "Port must be between 1 and 65535",
        ));
    }

    Ok(Target {
        hostname: hostname.to_string(),
        port,
    })
}

fn split_host_port(host: &str) -> Result<(&str, Option<u16>), ValidationError> {
    // Bracketed IPv6, optionally with a port
    if let Some(rest) = host.strip_prefix('[') {
        let (inner, after) = rest
            .split_once(']')
            .ok_or_else(|| ValidationError::new("host", "Unterminated '[' in host"))?;
        return match after.strip_prefix(':') {
            Some(port) => Ok((inner, Some(parse_port(port)?))),
            None if after.is_empty() => Ok((inner, None)),
            None => Err(ValidationError::new("host", "Unexpected text after ']'")),
        };
    }

    // Bare IPv6 contains several colons and no port
    if host.parse::<IpAddr>().is_ok() {
        return Ok((host, None));
    }

    match host.rsplit_once(':') {
        Some((name, port)) => Ok((name, Some(parse_port(port)?))),
        None => Ok((host, None)),
    }
}

fn parse_port(port_str: &str) -> Result<u16, ValidationError> {
    match port_str.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        Ok(_) => Err(ValidationError::new(
            "port",
            "Port must be between 1 and 65535",
        )),
        Err(_) => Err(ValidationError::new(
            "port",
            format!("Invalid port number: '{}'", port_str),
        )),
    }
}

/// Validate a hostname (DNS name or IP address).
///
/// Accepts IPv4, IPv6 and RFC 1123 DNS hostnames.
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::new("host", "Host is required"));
    }

    // DNS max is 253 characters
    if hostname.len() > 253 {
        return Err(ValidationError::new(
            "host",
            "Host exceeds maximum length of 253 characters",
        ));
    }

    if hostname.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::new(
                "host",
                "Host labels must be 1-63 characters",
            ));
        }

        if !DNS_LABEL_REGEX.is_match(label) {
            return Err(ValidationError::new(
                "host",
                format!(
                    "Invalid host label '{}': must start and end with alphanumeric, may contain hyphens",
                    label
                ),
            ));
        }
    }

    Ok(())
}

/// Validate a remote login name.
///
/// Callers trim the name first. The gateway has no local user to fall back
/// on, so the name is required. Anything else the remote host would accept
/// (leading digits, `user@realm`) is passed through.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::new("username", "Username is required"));
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(ValidationError::new(
            "username",
            format!(
                "Username exceeds maximum length of {} characters",
                MAX_USERNAME_LEN
            ),
        ));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::new(
            "username",
            "Username must not start with a hyphen or contain whitespace or control characters",
        ));
    }

    Ok(())
}
