//! End-to-end integration tests for rigterm.
//!
//! These tests drive a started daemon the way the CLI and a browser would:
//! - Session control over the IPC socket
//! - Terminal attachment over WebSocket
//! - Daemon startup and shutdown

mod common;

use std::time::{Duration, Instant};

use common::{next_message, read_until, send, TestDaemon, UNREACHABLE_ADDRESS};
use futures_util::SinkExt;
use protocol::{ClientMessage, CreateSessionRequest, ServerMessage, SessionStatus};
use rigterm::ipc::{IpcClient, IpcResponse};
use rigterm::orchestrator::OrchestratorState;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

async fn ipc(daemon: &TestDaemon) -> IpcClient {
    IpcClient::connect(daemon.orchestrator.socket_path())
        .await
        .unwrap()
}

async fn create(client: &mut IpcClient, request: CreateSessionRequest) -> String {
    match client.create_session(request).await.unwrap() {
        IpcResponse::SessionCreated(created) => {
            assert_eq!(created.status, SessionStatus::Connected);
            created.session_id
        }
        other => panic!("expected SessionCreated, got {other:?}"),
    }
}

// =============================================================================
// Orchestrator Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_daemon_answers_status() {
    let mut daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;

    assert!(client.ping().await.unwrap());
    match client.status().await.unwrap() {
        IpcResponse::Status {
            running,
            session_count,
            listen_addr,
            ..
        } => {
            assert!(running);
            assert_eq!(session_count, 0);
            assert_eq!(listen_addr, daemon.gateway_addr.to_string());
        }
        other => panic!("expected Status, got {other:?}"),
    }

    daemon.orchestrator.stop().await.unwrap();
    assert_eq!(daemon.orchestrator.state().await, OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_stop_closes_sessions_and_attachments() {
    let mut daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;
    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01").with_address("10.0.0.5"),
    )
    .await;

    let mut ws = daemon.attach(&session_id).await;
    read_until(&mut ws, "Connected to rig-01").await;

    daemon.orchestrator.stop().await.unwrap();

    assert!(daemon.orchestrator.registry().is_empty());
    assert_eq!(daemon.connector.state.closes(), 1);
    assert!(!daemon.orchestrator.socket_path().exists());
    // the attachment is dropped with its session
    assert!(next_message(&mut ws).await.is_none());
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[tokio::test]
async fn test_create_resize_input_close() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;

    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01")
            .with_address("10.0.0.5")
            .with_user("alice"),
    )
    .await;

    let mut ws = daemon.attach(&session_id).await;
    let welcome = read_until(&mut ws, "\r\n").await;
    assert_eq!(welcome, "Connected to rig-01 (alice@10.0.0.5)\r\n");

    send(&mut ws, &ClientMessage::Resize { cols: 80, rows: 24 }).await;
    send(
        &mut ws,
        &ClientMessage::Input {
            data: "ls\n".to_string(),
        },
    )
    .await;
    let output = read_until(&mut ws, "alice@rig-01:~$ ").await;
    assert!(output.starts_with("ls\r\n"));
    assert_eq!(daemon.connector.state.resizes(), vec![(80, 24)]);

    match client.close_session(session_id.clone()).await.unwrap() {
        IpcResponse::SessionClosed(closed) => {
            assert_eq!(closed.session_id, session_id);
            assert_eq!(closed.status, SessionStatus::Closed);
        }
        other => panic!("expected SessionClosed, got {other:?}"),
    }
    assert!(daemon.orchestrator.registry().get(&session_id).is_none());

    match client.close_session(session_id).await.unwrap() {
        IpcResponse::Error { message } => assert!(message.contains("session not found")),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_host_fails_within_connect_timeout() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;

    let started = Instant::now();
    let response = client
        .create_session(CreateSessionRequest::new("rig-09").with_address(UNREACHABLE_ADDRESS))
        .await
        .unwrap();

    match response {
        IpcResponse::Error { message } => assert!(message.contains("timed out"), "{message}"),
        other => panic!("expected Error, got {other:?}"),
    }
    // one second connect timeout plus scheduling slack
    assert!(started.elapsed() < Duration::from_secs(3));

    match client.list_sessions().await.unwrap() {
        IpcResponse::Sessions(listing) => assert_eq!(listing.total, 0),
        other => panic!("expected Sessions, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_attach_rejected_first_keeps_receiving() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;
    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01").with_address("10.0.0.5"),
    )
    .await;

    let mut first = daemon.attach(&session_id).await;
    read_until(&mut first, "Connected to rig-01").await;

    let mut second = daemon.attach(&session_id).await;
    match next_message(&mut second).await {
        Some(ServerMessage::Error { message }) => {
            assert!(message.contains("already has an attached client"), "{message}")
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(next_message(&mut second).await.is_none());

    send(
        &mut first,
        &ClientMessage::Input {
            data: "uptime\n".to_string(),
        },
    )
    .await;
    let output = read_until(&mut first, "root@rig-01:~$ ").await;
    assert!(output.contains("uptime"));
}

// =============================================================================
// Attachment Edge Cases
// =============================================================================

#[tokio::test]
async fn test_raw_text_is_treated_as_input() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;
    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01").with_address("10.0.0.5"),
    )
    .await;

    let mut ws = daemon.attach(&session_id).await;
    read_until(&mut ws, "Connected to rig-01").await;

    ws.send(Message::Text("nvidia-smi\n".to_string())).await.unwrap();

    let output = read_until(&mut ws, "root@rig-01:~$ ").await;
    assert!(output.starts_with("nvidia-smi\r\n"));
}

#[tokio::test]
async fn test_attach_to_unknown_session_gets_error_frame() {
    let daemon = TestDaemon::start().await;

    let mut ws = daemon.attach("no-such-session").await;
    match next_message(&mut ws).await {
        Some(ServerMessage::Error { message }) => {
            assert_eq!(message, "session not found: no-such-session")
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(next_message(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_wrong_path_is_refused_before_upgrade() {
    let daemon = TestDaemon::start().await;
    let url = format!("ws://{}/terminal/abc", daemon.gateway_addr);

    match tokio_tungstenite::connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("expected HTTP 404, got {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_remote_exit_notifies_client() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;
    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01").with_address("10.0.0.5"),
    )
    .await;

    let mut ws = daemon.attach(&session_id).await;
    read_until(&mut ws, "Connected to rig-01").await;

    send(
        &mut ws,
        &ClientMessage::Input {
            data: "exit\n".to_string(),
        },
    )
    .await;

    match next_message(&mut ws).await {
        Some(ServerMessage::Error { message }) => assert!(message.contains("closed"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }

    let session = daemon.orchestrator.registry().get(&session_id).unwrap();
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn test_reattach_after_disconnect() {
    let daemon = TestDaemon::start().await;
    let mut client = ipc(&daemon).await;
    let session_id = create(
        &mut client,
        CreateSessionRequest::new("rig-01").with_address("10.0.0.5"),
    )
    .await;

    let mut ws = daemon.attach(&session_id).await;
    read_until(&mut ws, "Connected to rig-01").await;
    drop(ws);

    // detach completes asynchronously once the server sees the drop
    let session = daemon.orchestrator.registry().get(&session_id).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.is_attached() {
        assert!(Instant::now() < deadline, "attachment never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut ws = daemon.attach(&session_id).await;
    read_until(&mut ws, "Connected to rig-01").await;
    send(
        &mut ws,
        &ClientMessage::Input {
            data: "hostname\n".to_string(),
        },
    )
    .await;
    read_until(&mut ws, "root@rig-01:~$ ").await;
}
