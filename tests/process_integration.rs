//! Integration tests that run real subprocesses as the language server.
//!
//! These rely on `cat`, `sh` and `sleep` being on `PATH`.
//!
//! # Running
//!
//! ```bash
//! cargo test --test process_integration -- --nocapture
//! ```

#![cfg(unix)]

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::io::{duplex, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::timeout;

use lsp_server_wrapper::{read_message, serve, Pump, StreamPair, WrapperConfig};

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Returns the editor's ends (input, output) and the wrapper's client pair.
fn client_pipes() -> (DuplexStream, BufReader<DuplexStream>, StreamPair<DuplexStream, DuplexStream>) {
    let (client_in, wrapper_reader) = duplex(64 * 1024);
    let (wrapper_writer, client_out) = duplex(64 * 1024);
    (
        client_in,
        BufReader::new(client_out),
        StreamPair::new(wrapper_reader, wrapper_writer),
    )
}

#[tokio::test]
async fn test_echo_server_round_trip() {
    let (mut client_in, mut client_out, client) = client_pipes();
    let config = WrapperConfig::default();
    let cmd = command(&["cat"]);

    let driver = async move {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"processId":null}}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        client_in.write_all(frame.as_bytes()).await.expect("Write failed");

        let echoed = read_message(&mut client_out, 1024 * 1024)
            .await
            .expect("Read failed")
            .expect("Stream closed");
        assert_eq!(echoed.raw(), body.as_bytes());

        drop(client_in);
        client_out
    };

    let (outcome, _client_out) = timeout(TEST_TIMEOUT, async {
        tokio::join!(serve(&cmd, &config, client), driver)
    })
    .await
    .expect("Test timed out");

    let outcome = outcome.expect("session should start");
    assert_eq!(outcome.engine.as_ref().ok(), Some(&Pump::ClientReader));
    // cat either sees EOF on stdin first or is stopped by SIGTERM.
    assert!(
        matches!(outcome.exit_code, Some(0) | None),
        "unexpected exit code {:?}",
        outcome.exit_code
    );
}

#[tokio::test]
async fn test_server_exit_code_is_reported() {
    let (client_in, client_out, client) = client_pipes();
    let config = WrapperConfig::default();
    let cmd = command(&["sh", "-c", "exit 3"]);

    let outcome = timeout(TEST_TIMEOUT, serve(&cmd, &config, client))
        .await
        .expect("Test timed out")
        .expect("session should start");
    drop((client_in, client_out));

    assert_eq!(outcome.engine.as_ref().ok(), Some(&Pump::ServerReader));
    assert_eq!(outcome.exit_code, Some(3));
    assert_eq!(outcome.process_exit_code(), 3);
}

#[tokio::test]
async fn test_stubborn_server_is_killed_after_grace() {
    let (client_in, client_out, client) = client_pipes();
    let config = WrapperConfig {
        terminate_grace_ms: 100,
        ..WrapperConfig::default()
    };
    let cmd = command(&["sh", "-c", "trap '' TERM; exec sleep 30"]);

    // Closing the editor side ends the session right away.
    drop(client_in);

    let started = Instant::now();
    let outcome = timeout(TEST_TIMEOUT, serve(&cmd, &config, client))
        .await
        .expect("Test timed out")
        .expect("session should start");
    drop(client_out);

    assert_eq!(outcome.engine.as_ref().ok(), Some(&Pump::ClientReader));
    assert_eq!(outcome.exit_code, None);
    assert_eq!(outcome.process_exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_server_binary_fails_to_start() {
    let (_client_in, _client_out, client) = client_pipes();
    let config = WrapperConfig::default();
    let cmd = command(&["lsp-server-wrapper-test-missing-binary"]);

    let err = serve(&cmd, &config, client).await.unwrap_err();
    assert!(err.to_string().contains("lsp-server-wrapper-test-missing-binary"));
}
