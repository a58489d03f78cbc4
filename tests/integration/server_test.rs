// tests/integration/server_test.rs

//! End-to-end tests of request delivery through the server

use super::test_helpers::{
    RecordingApp, TestCerts, TestClient, bind_listener, connect, next_frame, wait_until,
};
use bytes::Bytes;
use futures::SinkExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use titan::Server;
use titan::connection::ConnectionOptions;
use titan::core::delivery::{Response, response_handler};
use titan::core::protocol::Frame;
use tokio::sync::mpsc;

struct TestServer {
    server: Arc<Server>,
    app: Arc<RecordingApp>,
    certs: TestCerts,
}

impl TestServer {
    async fn start() -> Self {
        let certs = TestCerts::generate();
        let listener = bind_listener(&certs, ConnectionOptions::default()).await;
        let app = RecordingApp::new();
        let server = Arc::new(Server::new(listener, app.clone()));
        tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        Self { server, app, certs }
    }

    async fn login(&self, user: &str) -> TestClient {
        let mut client = connect(self.server.listener().local_addr(), &self.certs).await;
        let payload = format!("login:{user}");
        client
            .send(Frame::Message(Bytes::from(payload)))
            .await
            .unwrap();
        client
    }
}

/// Reads the next frame and parses it as a JSON request.
async fn next_request(client: &mut TestClient) -> Value {
    match next_frame(client).await {
        Some(Frame::Message(payload)) => serde_json::from_slice(&payload).unwrap(),
        other => panic!("Expected a request frame, got {other:?}"),
    }
}

async fn reply(client: &mut TestClient, body: Value) {
    client
        .send(Frame::Message(Bytes::from(body.to_string())))
        .await
        .unwrap();
}

fn response_channel() -> (
    titan::core::delivery::ResponseHandler,
    mpsc::UnboundedReceiver<Response>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = response_handler(move |response| {
        let _ = tx.send(response);
    });
    (handler, rx)
}

#[tokio::test]
async fn test_queued_request_is_delivered_after_login() {
    let ts = TestServer::start().await;
    let (on_response, mut responses) = response_channel();
    ts.server
        .queue()
        .enqueue("alice", "notify", json!({ "n": 1 }), on_response);
    assert_eq!(ts.server.queue().pending_count("alice"), 1);

    let mut client = ts.login("alice").await;
    let request = next_request(&mut client).await;
    assert_eq!(request["method"], "notify");
    assert_eq!(request["params"], json!({ "n": 1 }));
    let id = request["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("m-"));

    wait_until(|| ts.server.queue().pending_count("alice") == 0).await;
    assert_eq!(ts.server.router().pending_count(), 1);

    reply(&mut client, json!({ "id": id, "result": "ok" })).await;
    let response = tokio::time::timeout(Duration::from_secs(2), responses.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.request_id, id);
    assert_eq!(response.outcome, Ok(json!("ok")));
    assert_eq!(ts.server.router().pending_count(), 0);

    // The reply was consumed by the router, not the application.
    assert_eq!(ts.app.message_count(), 1);
}

#[tokio::test]
async fn test_error_reply_reaches_response_handler() {
    let ts = TestServer::start().await;
    let mut client = ts.login("bob").await;
    wait_until(|| ts.server.queue().directory().lookup("bob").is_some()).await;

    let (on_response, mut responses) = response_channel();
    ts.server
        .queue()
        .enqueue("bob", "charge", json!({ "amount": 5 }), on_response);
    let request = next_request(&mut client).await;

    reply(
        &mut client,
        json!({ "id": request["id"], "error": { "code": 402 } }),
    )
    .await;
    let response = tokio::time::timeout(Duration::from_secs(2), responses.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.outcome, Err(json!({ "code": 402 })));
}

#[tokio::test]
async fn test_requests_arrive_in_enqueue_order() {
    let ts = TestServer::start().await;
    for n in 0..5 {
        ts.server
            .queue()
            .enqueue("carol", "step", json!(n), response_handler(|_| {}));
    }

    let mut client = ts.login("carol").await;
    for n in 0..5 {
        let request = next_request(&mut client).await;
        assert_eq!(request["params"], json!(n));
    }
}

#[tokio::test]
async fn test_disconnect_requeues_until_next_login() {
    let ts = TestServer::start().await;
    let mut first = ts.login("dave").await;
    wait_until(|| ts.server.queue().directory().lookup("dave").is_some()).await;

    first.send(Frame::Close).await.unwrap();
    wait_until(|| ts.app.disconnect_count() == 1).await;
    assert_eq!(ts.server.queue().directory().lookup("dave"), None);

    ts.server
        .queue()
        .enqueue("dave", "later", json!(null), response_handler(|_| {}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ts.server.queue().pending_count("dave"), 1);

    let mut second = ts.login("dave").await;
    let request = next_request(&mut second).await;
    assert_eq!(request["method"], "later");
}

#[tokio::test]
async fn test_first_connection_keeps_the_user() {
    let ts = TestServer::start().await;
    let mut first = ts.login("erin").await;
    wait_until(|| ts.server.queue().directory().lookup("erin").is_some()).await;
    let first_id = ts.server.queue().directory().lookup("erin");

    let _second = ts.login("erin").await;
    wait_until(|| ts.app.message_count() == 2).await;
    assert_eq!(ts.server.queue().directory().lookup("erin"), first_id);

    ts.server
        .queue()
        .enqueue("erin", "ping-user", json!(null), response_handler(|_| {}));
    let request = next_request(&mut first).await;
    assert_eq!(request["method"], "ping-user");
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let ts = TestServer::start().await;
    let mut a = ts.login("frank").await;
    let mut b = ts.login("grace").await;
    wait_until(|| ts.app.message_count() == 2).await;

    ts.server.shutdown();
    assert_eq!(next_frame(&mut a).await, None);
    assert_eq!(next_frame(&mut b).await, None);
    wait_until(|| ts.app.disconnect_count() == 2).await;
    assert!(ts.server.listener().is_closed());
    assert!(ts.server.queue().directory().is_empty());
}
