// src/server/initialization.rs

//! Builds the TLS acceptor from PEM material.

use crate::config::TlsConfig;
use crate::core::TitanError;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::{TlsAcceptor, rustls};

/// Builds a TLS acceptor from a PEM certificate chain and private key.
///
/// Clients may connect without a certificate. A client that presents one must
/// present a certificate issued by the server's own chain.
pub(crate) fn build_acceptor(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, TitanError> {
    let certs = load_certs(cert_pem)?;
    let key = load_key(key_pem)?;

    let mut client_roots = rustls::RootCertStore::empty();
    client_roots.add_parsable_certificates(certs.iter().cloned());
    let client_verifier = WebPkiClientVerifier::builder(Arc::new(client_roots))
        .allow_unauthenticated()
        .build()
        .map_err(|e| TitanError::Tls(format!("Failed to build the client verifier: {e}")))?;

    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Parses TLS certificates from PEM bytes.
fn load_certs(
    mut pem: &[u8],
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TitanError> {
    let certs = rustls_pemfile::certs(&mut pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TitanError::Tls(format!("Failed to parse the certificate: {e}")))?;
    if certs.is_empty() {
        return Err(TitanError::Tls(
            "No certificates found in the certificate PEM".to_string(),
        ));
    }
    Ok(certs)
}

/// Parses a private key from PEM bytes.
fn load_key(mut pem: &[u8]) -> Result<rustls::pki_types::PrivateKeyDer<'static>, TitanError> {
    rustls_pemfile::private_key(&mut pem)
        .map_err(|e| TitanError::Tls(format!("Failed to parse the private key: {e}")))?
        .ok_or_else(|| TitanError::Tls("No private key found in the key PEM".to_string()))
}

/// Reads the certificate and key files named in the configuration.
pub fn read_tls_files(tls: &TlsConfig) -> Result<(Vec<u8>, Vec<u8>)> {
    let cert = std::fs::read(&tls.cert_path)
        .with_context(|| format!("Failed to open certificate file '{}'", tls.cert_path))?;
    let key = std::fs::read(&tls.key_path)
        .with_context(|| format!("Failed to open private key file '{}'", tls.key_path))?;
    Ok((cert, key))
}
