use std::sync::Arc;

use anyhow::Context;
use keygate::app::AppState;
use keygate::config::{CredentialMode, GatewayConfig};
use keygate::credentials::artifact;
use keygate::server;
use keygate::ssh::SshClient;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with file output.
    let log_dir = keygate::config::paths::ensure_log_dir().ok();
    let _guard = keygate::logging::init_logging(log_dir);

    tracing::info!("Starting keygate {}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = keygate::config::paths::log_dir() {
        tracing::info!("Logging to {}", dir.display());
    }

    let config = GatewayConfig::load().context("Failed to load configuration")?;
    let addr = config.server.listen_addr()?;

    if config.ssh.credential_mode == CredentialMode::File {
        let dir = config.ssh.credential_dir();
        artifact::ensure_credential_dir(&dir)
            .with_context(|| format!("Failed to create credential dir {}", dir.display()))?;
        tracing::info!("Writing temporary key files to {}", dir.display());
    }

    let transport = SshClient::from_settings(&config.ssh);
    let state = Arc::new(AppState::new(config, transport));
    let _sweeper = state.spawn_session_sweeper();

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("keygate listening on {}", addr);

    server::serve(state, listener, shutdown_signal()).await?;
    tracing::info!("keygate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
