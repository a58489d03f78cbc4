// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use titan::connection::{Connection, ConnectionOptions, MessageHandler, SharedSession};
use titan::core::protocol::{Frame, FrameCodec};
use titan::server::Listener;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// A self-signed certificate for `localhost` in the forms the server and the
/// client need.
#[derive(Clone)]
pub struct TestCerts {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

impl TestCerts {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("Failed to generate a self-signed certificate");
        Self {
            cert_pem: certified.cert.pem().into_bytes(),
            key_pem: certified.key_pair.serialize_pem().into_bytes(),
            cert_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }
}

/// A client-side framed TLS connection.
pub type TestClient = Framed<TlsStream<TcpStream>, FrameCodec>;

/// Sets up minimal tracing for tests. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Binds a listener on an ephemeral localhost port.
pub async fn bind_listener(certs: &TestCerts, options: ConnectionOptions) -> Listener {
    init_tracing();
    Listener::bind_with(&certs.cert_pem, &certs.key_pem, "127.0.0.1:0", options)
        .await
        .expect("Failed to bind the test listener")
}

/// Opens a TLS connection that trusts only the test certificate.
pub async fn connect(addr: SocketAddr, certs: &TestCerts) -> TestClient {
    connect_as(addr, certs, None)
        .await
        .expect("TLS handshake failed")
}

/// Opens a TLS connection, presenting `identity` as the client certificate
/// when one is given.
pub async fn connect_as(
    addr: SocketAddr,
    certs: &TestCerts,
    identity: Option<&TestCerts>,
) -> std::io::Result<TestClient> {
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(certs.cert_der.clone())
        .expect("Failed to trust the test certificate");
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match identity {
        Some(identity) => {
            let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.clone()));
            builder
                .with_client_auth_cert(vec![identity.cert_der.clone()], key)
                .expect("Invalid client identity")
        }
        None => builder.with_no_client_auth(),
    };
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(addr).await?;
    let domain = ServerName::try_from("localhost").expect("Invalid server name");
    let tls = connector.connect(domain, tcp).await?;
    Ok(Framed::new(tls, FrameCodec::default()))
}

/// Reads the next frame, failing the test if none arrives within two seconds.
pub async fn next_frame(client: &mut TestClient) -> Option<Frame> {
    use futures::StreamExt;
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("Timed out waiting for a frame")
        .map(|res| res.expect("Failed to decode a frame"))
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// An application handler that records events. A `login:<user>` message sets
/// the session's user and `echo:<text>` replies with `<text>`.
#[derive(Default)]
pub struct RecordingApp {
    pub messages: Mutex<Vec<(u64, Bytes)>>,
    pub disconnects: AtomicUsize,
}

impl RecordingApp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingApp {
    async fn on_message(&self, connection: Connection, session: SharedSession, payload: Bytes) {
        if let Some(user) = payload.strip_prefix(b"login:") {
            session.lock().user_id = Some(String::from_utf8_lossy(user).into_owned());
        } else if let Some(text) = payload.strip_prefix(b"echo:") {
            let _ = connection.send(Bytes::copy_from_slice(text)).await;
        }
        self.messages.lock().push((connection.id(), payload));
    }

    async fn on_disconnect(&self, _connection: Connection, _session: SharedSession) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
