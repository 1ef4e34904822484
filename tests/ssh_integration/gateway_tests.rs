//! Full gateway sessions against a real OpenSSH server

use std::sync::Arc;
use std::time::Duration;

use keygate::app::AppState;
use keygate::config::{CredentialMode, GatewayConfig};
use keygate::gateway::SessionGateway;
use keygate::gateway::protocol::Event;
use keygate::ssh::SshClient;

use super::common::{connect, events_until_prompt, execute, next_event, socket_pair};
use super::fixtures::SshTestEnvironment;

fn gateway_config(credential_dir: &std::path::Path, mode: CredentialMode) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.ssh.credential_mode = mode;
    config.ssh.credential_dir = Some(credential_dir.to_path_buf());
    // A real shell needs more time than the default drain allows
    config.drain.settle_ms = 300;
    config.drain.poll_interval_ms = 100;
    config.drain.idle_polls = 5;
    config
}

async fn run_session(mode: CredentialMode) {
    let env = SshTestEnvironment::new().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), mode);
    let state = Arc::new(AppState::new(config, SshClient::new(10, 0)));

    let provisioned = state.provision().unwrap();
    env.authorize_key(&provisioned.public_key).unwrap();
    let id = provisioned.session_id;

    let gateway = SessionGateway::admit(state.clone(), id).unwrap();
    let (mut client, server) = socket_pair().await;
    let handle = tokio::spawn(gateway.run(server));

    let host = format!("{}:{}", env.server.host, env.server.port);
    connect(&mut client, &host, &env.server.username).await;
    assert_eq!(
        next_event(&mut client).await,
        Some(Event::prompt(&env.server.username, &env.server.host))
    );

    execute(&mut client, "echo keygate-$((40 + 2))").await;
    let mut output = String::new();
    for _ in 0..5 {
        for event in events_until_prompt(&mut client).await {
            if let Event::Output(text) = event {
                output.push_str(&text);
            }
        }
        if output.contains("keygate-42") {
            break;
        }
        execute(&mut client, "").await;
    }
    assert!(output.contains("keygate-42"), "Unexpected output: {}", output);

    drop(client);
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!state.store.contains(id));
    assert!(state.bridges.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_gateway_session_with_memory_key() {
    skip_if_no_docker!();
    run_session(CredentialMode::Memory).await;
}

#[tokio::test]
async fn test_gateway_session_with_file_key() {
    skip_if_no_docker!();
    run_session(CredentialMode::File).await;
}

#[tokio::test]
async fn test_gateway_reports_auth_failure() {
    skip_if_no_docker!();
    let env = SshTestEnvironment::new().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = gateway_config(dir.path(), CredentialMode::Memory);
    let state = Arc::new(AppState::new(config, SshClient::new(10, 0)));

    // Key is never authorized on the server
    let id = state.provision().unwrap().session_id;
    let gateway = SessionGateway::admit(state.clone(), id).unwrap();
    let (mut client, server) = socket_pair().await;
    let handle = tokio::spawn(gateway.run(server));

    let host = format!("{}:{}", env.server.host, env.server.port);
    connect(&mut client, &host, &env.server.username).await;
    assert!(matches!(next_event(&mut client).await, Some(Event::Error(_))));

    execute(&mut client, "ls").await;
    assert_eq!(
        next_event(&mut client).await,
        Some(Event::error("No active SSH session"))
    );

    drop(client);
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!state.store.contains(id));
}
