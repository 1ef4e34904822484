//! SSH integration tests
//!
//! These tests require Docker to run a test SSH server.
//! The server is automatically started when tests run.
//!
//! ## Running the tests
//!
//! ```bash
//! # Run the tests (Docker containers start automatically)
//! cargo test --test ssh_integration
//!
//! # Cleanup (optional - containers are reused)
//! cd tests/docker && docker-compose down -v
//! ```

#[path = "../common/mod.rs"]
mod common;

#[macro_use]
pub mod fixtures;

mod gateway_tests;
mod transport_tests;
