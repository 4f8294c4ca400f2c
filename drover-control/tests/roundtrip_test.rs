//! Server/client exchange over a real Unix socket.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use drover_common::Signal;
use drover_control::{
    CommandHandler, ControlAuthConfig, ControlClient, ControlServer, Request, RequestCommand,
    Response, ResponsePayload, SystemCommand,
};

struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle_request(&self, request: Request) -> drover_control::Result<Response> {
        match request.command {
            RequestCommand::System(SystemCommand::Ping) => Ok(Response::ok("pong")),
            _ => Ok(Response::error("unsupported")),
        }
    }
}

async fn start_server(socket: String, auth: ControlAuthConfig) -> broadcast::Sender<Signal> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    tokio::spawn(async move {
        let server = ControlServer::new(socket, auth, Arc::new(PingHandler));
        let _ = server.serve(shutdown_rx).await;
    });
    // Give the listener a moment to bind.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    shutdown_tx
}

#[tokio::test]
async fn test_ping_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("drover.sock").display().to_string();
    let shutdown = start_server(socket.clone(), ControlAuthConfig::default()).await;

    let client = ControlClient::new(socket, None);
    let response = client
        .send(RequestCommand::System(SystemCommand::Ping))
        .await
        .unwrap();

    match response.payload {
        ResponsePayload::Ok(message) => assert_eq!(message, "pong"),
        other => panic!("unexpected payload: {other:?}"),
    }

    let _ = shutdown.send(Signal::Shutdown);
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("drover.sock").display().to_string();

    // SHA-256 of "letmein"
    let auth = ControlAuthConfig {
        enabled: true,
        token_hashes: vec![
            "1c8bfe8f801d79745c4631d09fff36c82aa37fc4cce4fc946683d7b336b63032".to_string(),
        ],
    };
    let shutdown = start_server(socket.clone(), auth).await;

    let bad = ControlClient::new(socket.clone(), Some("wrong".to_string()));
    let response = bad
        .send(RequestCommand::System(SystemCommand::Ping))
        .await
        .unwrap();
    assert!(matches!(response.payload, ResponsePayload::Error(ref m) if m == "unauthorized"));

    let _ = shutdown.send(Signal::Shutdown);
}
