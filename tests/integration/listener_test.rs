// tests/integration/listener_test.rs

//! End-to-end tests of the TLS listener

use super::test_helpers::{
    RecordingApp, TestCerts, bind_listener, connect, connect_as, next_frame, wait_until,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use titan::TitanError;
use titan::connection::ConnectionOptions;
use titan::core::protocol::Frame;
use titan::server::Listener;

fn message(payload: &'static [u8]) -> Frame {
    Frame::Message(Bytes::from_static(payload))
}

#[tokio::test]
async fn test_listener_rejects_invalid_certificate() {
    let certs = TestCerts::generate();
    let result = Listener::bind(b"not a certificate", &certs.key_pem, "127.0.0.1:0", false).await;
    assert!(matches!(result, Err(TitanError::Tls(_))));

    let result = Listener::bind(&certs.cert_pem, b"not a key", "127.0.0.1:0", false).await;
    assert!(matches!(result, Err(TitanError::Tls(_))));
}

#[tokio::test]
async fn test_listener_rejects_unbindable_address() {
    let certs = TestCerts::generate();
    let result = Listener::bind(&certs.cert_pem, &certs.key_pem, "not-an-address", false).await;
    assert!(matches!(result, Err(TitanError::Config(_))));

    let first = bind_listener(&certs, ConnectionOptions::default()).await;
    let taken = first.local_addr().to_string();
    let result = Listener::bind(&certs.cert_pem, &certs.key_pem, &taken, false).await;
    assert!(matches!(result, Err(TitanError::Config(_))));
}

#[tokio::test]
async fn test_messages_over_tls_reach_handler() {
    let certs = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    let accept = tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut client = connect(listener.local_addr(), &certs).await;
    client.send(Frame::Ping).await.unwrap();
    client.send(message(b"hello")).await.unwrap();
    client.send(message(b"echo:world")).await.unwrap();

    assert_eq!(next_frame(&mut client).await, Some(message(b"world")));
    wait_until(|| app.message_count() == 2).await;
    assert_eq!(listener.connection_count(), 1);

    client.send(Frame::Close).await.unwrap();
    wait_until(|| app.disconnect_count() == 1).await;
    wait_until(|| listener.connection_count() == 0).await;
    assert_eq!(app.message_count(), 2);

    listener.close();
    let result = tokio::time::timeout(Duration::from_secs(2), accept)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_client_certificate_from_server_chain_is_accepted() {
    let certs = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut client = connect_as(listener.local_addr(), &certs, Some(&certs))
        .await
        .unwrap();
    client.send(message(b"echo:trusted")).await.unwrap();
    assert_eq!(next_frame(&mut client).await, Some(message(b"trusted")));
    listener.close();
}

#[tokio::test]
async fn test_unknown_client_certificate_is_rejected() {
    let certs = TestCerts::generate();
    let stranger = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    // Depending on the TLS version the client sees the rejection either during
    // the handshake or on its first read.
    if let Ok(mut client) = connect_as(listener.local_addr(), &certs, Some(&stranger)).await {
        let _ = client.send(message(b"echo:hello")).await;
        let reply = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("server neither answered nor closed");
        assert!(!matches!(reply, Some(Ok(_))), "got a reply: {reply:?}");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.message_count(), 0);
    assert_eq!(listener.connection_count(), 0);
    listener.close();
}

#[tokio::test]
async fn test_each_connection_gets_its_own_id() {
    let certs = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut a = connect(listener.local_addr(), &certs).await;
    let mut b = connect(listener.local_addr(), &certs).await;
    a.send(message(b"from a")).await.unwrap();
    b.send(message(b"from b")).await.unwrap();
    wait_until(|| app.message_count() == 2).await;

    let messages = app.messages.lock().clone();
    assert_ne!(messages[0].0, messages[1].0);
    for (id, _) in &messages {
        assert!(listener.connection(*id).is_some());
    }
    listener.close();
}

#[tokio::test]
async fn test_idle_tls_connection_is_closed() {
    let certs = TestCerts::generate();
    let options = ConnectionOptions {
        idle_timeout: Duration::from_millis(200),
        ..ConnectionOptions::default()
    };
    let listener = Arc::new(bind_listener(&certs, options).await);
    let app = RecordingApp::new();
    tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut client = connect(listener.local_addr(), &certs).await;
    client.send(message(b"hello")).await.unwrap();

    // The server closes the stream once the deadline passes.
    assert_eq!(next_frame(&mut client).await, None);
    wait_until(|| app.disconnect_count() == 1).await;
    listener.close();
}

#[tokio::test]
async fn test_close_keeps_accepted_connections() {
    let certs = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    let accept = tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut client = connect(listener.local_addr(), &certs).await;
    client.send(message(b"before")).await.unwrap();
    wait_until(|| app.message_count() == 1).await;

    listener.close();
    assert!(
        tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .unwrap()
            .unwrap()
            .is_ok()
    );
    assert!(listener.is_closed());

    // The accepted connection is still served.
    client.send(message(b"echo:still here")).await.unwrap();
    assert_eq!(next_frame(&mut client).await, Some(message(b"still here")));
    assert_eq!(app.disconnect_count(), 0);

    // New connections are refused.
    assert!(
        tokio::net::TcpStream::connect(listener.local_addr())
            .await
            .is_err()
    );

    // Accepting again after close is an error.
    let again = listener.accept(app.clone()).await;
    assert_eq!(again, Err(TitanError::ListenerClosed));
}

#[tokio::test]
async fn test_close_connections_runs_every_disconnect_handler() {
    let certs = TestCerts::generate();
    let listener = Arc::new(bind_listener(&certs, ConnectionOptions::default()).await);
    let app = RecordingApp::new();
    tokio::spawn({
        let listener = listener.clone();
        let app = app.clone();
        async move { listener.accept(app).await }
    });

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = connect(listener.local_addr(), &certs).await;
        client.send(message(b"hi")).await.unwrap();
        clients.push(client);
    }
    wait_until(|| listener.connection_count() == 3).await;

    listener.close();
    assert_eq!(listener.close_connections(), 3);
    wait_until(|| app.disconnect_count() == 3).await;
    wait_until(|| listener.connection_count() == 0).await;

    for client in &mut clients {
        assert_eq!(next_frame(client).await, None);
    }
}
