//! russh transport against a real OpenSSH server

use std::time::Duration;

use keygate::credentials::{self, KeyArtifact, SessionStore};
use keygate::error::SshError;
use keygate::ssh::{KeySource, ShellChannel, SshClient};

use super::fixtures::SshTestEnvironment;

/// Poll the channel until `needle` shows up in the output or the deadline passes
async fn read_until<C: ShellChannel>(channel: &mut C, needle: &str) -> String {
    let mut output = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    while tokio::time::Instant::now() < deadline {
        match channel.try_recv(4096) {
            Ok(Some(bytes)) => {
                output.push_str(&String::from_utf8_lossy(&bytes));
                if output.contains(needle) {
                    break;
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(e) => panic!("Channel failed while reading: {}", e),
        }
    }
    output
}

#[tokio::test]
async fn test_provisioned_key_opens_shell_from_memory() {
    skip_if_no_docker!();
    let env = SshTestEnvironment::new().await.unwrap();

    let store = SessionStore::new();
    let provisioned = credentials::provision(&store, "keygate-test").unwrap();
    env.authorize_key(&provisioned.public_key).unwrap();
    let key = store.take(provisioned.session_id).unwrap();

    let client = SshClient::new(10, 0);
    let mut session = client
        .connect(&env.server.target(), KeySource::Memory(&key))
        .await
        .expect("Connection should succeed");

    session.send(b"echo keygate-$((40 + 2))\n").await.unwrap();
    let output = read_until(&mut session, "keygate-42").await;
    assert!(output.contains("keygate-42"), "Unexpected output: {}", output);

    session.close().await;
    session.close().await;
}

#[tokio::test]
async fn test_provisioned_key_opens_shell_from_file() {
    skip_if_no_docker!();
    let env = SshTestEnvironment::new().await.unwrap();

    let store = SessionStore::new();
    let provisioned = credentials::provision(&store, "keygate-test").unwrap();
    env.authorize_key(&provisioned.public_key).unwrap();
    let key = store.take(provisioned.session_id).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let artifact = KeyArtifact::create(dir.path(), provisioned.session_id, &key).unwrap();
    let path = artifact.path().to_path_buf();

    let client = SshClient::new(10, 0);
    let mut session = client
        .connect(&env.server.target(), KeySource::File(artifact))
        .await
        .expect("Connection should succeed");
    assert!(!path.exists());
    session.close().await;
}

#[tokio::test]
async fn test_unauthorized_key_is_rejected() {
    skip_if_no_docker!();
    let env = SshTestEnvironment::new().await.unwrap();

    let store = SessionStore::new();
    let provisioned = credentials::provision(&store, "keygate-test").unwrap();
    let key = store.take(provisioned.session_id).unwrap();

    let client = SshClient::new(10, 0);
    let err = client
        .connect(&env.server.target(), KeySource::Memory(&key))
        .await
        .unwrap_err();
    assert!(matches!(err, SshError::AuthenticationFailed(_)), "Got {:?}", err);
}

#[tokio::test]
async fn test_exit_closes_channel() {
    skip_if_no_docker!();
    let env = SshTestEnvironment::new().await.unwrap();

    let store = SessionStore::new();
    let provisioned = credentials::provision(&store, "keygate-test").unwrap();
    env.authorize_key(&provisioned.public_key).unwrap();
    let key = store.take(provisioned.session_id).unwrap();

    let client = SshClient::new(10, 0);
    let mut session = client
        .connect(&env.server.target(), KeySource::Memory(&key))
        .await
        .unwrap();

    session.send(b"exit\n").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let closed = loop {
        match session.try_recv(4096) {
            Err(SshError::ChannelClosed) => break true,
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) if tokio::time::Instant::now() > deadline => break false,
            Ok(Some(_)) => {}
            Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    };
    assert!(closed);
}
