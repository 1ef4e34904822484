//! keygate SSH gateway library
//!
//! This module exposes the core functionality for use in integration tests
//! and the main binary.

// Public modules for integration testing
pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod ssh;
pub mod validation;

// Public modules for the binary
pub mod app;
pub mod logging;
pub mod server;

// Internal modules
pub(crate) mod security_log;
