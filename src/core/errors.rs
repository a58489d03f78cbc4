// src/core/errors.rs

//! Defines the primary error type for the transport and delivery core.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
#[derive(Error, Debug)]
pub enum TitanError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    // --- Framing errors (connection-fatal) ---
    #[error("Invalid content length header: {0}")]
    InvalidLengthHeader(String),

    #[error("Frame of {declared} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("Stream ended after {received} of {expected} bytes")]
    IncompleteFrame { expected: usize, received: usize },

    #[error("No frame received within {0:?}")]
    IdleTimeout(Duration),

    #[error("Peer did not accept outbound data within {0:?}")]
    WriteTimeout(Duration),

    #[error("Frames must carry at least one byte")]
    EmptyFrame,

    // --- Transport and configuration errors ---
    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Listener is closed")]
    ListenerClosed,

    // --- Delivery errors (recoverable) ---
    #[error("Connection {0} not found")]
    ConnectionNotFound(u64),

    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),

    #[error("Delivery Error: {0}")]
    Delivery(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl TitanError {
    /// True for errors that end the connection they occurred on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            TitanError::Io(_)
                | TitanError::InvalidLengthHeader(_)
                | TitanError::FrameTooLarge { .. }
                | TitanError::IncompleteFrame { .. }
                | TitanError::IdleTimeout(_)
                | TitanError::WriteTimeout(_)
                | TitanError::Tls(_)
        )
    }

    /// True if the error is the peer going away rather than misbehaving.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            TitanError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for TitanError {
    fn clone(&self) -> Self {
        match self {
            TitanError::Io(e) => TitanError::Io(Arc::clone(e)),
            TitanError::InvalidLengthHeader(s) => TitanError::InvalidLengthHeader(s.clone()),
            TitanError::FrameTooLarge { declared, max } => TitanError::FrameTooLarge {
                declared: *declared,
                max: *max,
            },
            TitanError::IncompleteFrame { expected, received } => TitanError::IncompleteFrame {
                expected: *expected,
                received: *received,
            },
            TitanError::IdleTimeout(d) => TitanError::IdleTimeout(*d),
            TitanError::WriteTimeout(d) => TitanError::WriteTimeout(*d),
            TitanError::EmptyFrame => TitanError::EmptyFrame,
            TitanError::Tls(s) => TitanError::Tls(s.clone()),
            TitanError::Config(s) => TitanError::Config(s.clone()),
            TitanError::ListenerClosed => TitanError::ListenerClosed,
            TitanError::ConnectionNotFound(id) => TitanError::ConnectionNotFound(*id),
            TitanError::ConnectionClosed(id) => TitanError::ConnectionClosed(*id),
            TitanError::Delivery(s) => TitanError::Delivery(s.clone()),
            TitanError::Internal(s) => TitanError::Internal(s.clone()),
        }
    }
}

impl PartialEq for TitanError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TitanError::Io(e1), TitanError::Io(e2)) => e1.kind() == e2.kind(),
            (TitanError::InvalidLengthHeader(s1), TitanError::InvalidLengthHeader(s2)) => s1 == s2,
            (
                TitanError::FrameTooLarge {
                    declared: d1,
                    max: m1,
                },
                TitanError::FrameTooLarge {
                    declared: d2,
                    max: m2,
                },
            ) => d1 == d2 && m1 == m2,
            (
                TitanError::IncompleteFrame {
                    expected: e1,
                    received: r1,
                },
                TitanError::IncompleteFrame {
                    expected: e2,
                    received: r2,
                },
            ) => e1 == e2 && r1 == r2,
            (TitanError::IdleTimeout(d1), TitanError::IdleTimeout(d2)) => d1 == d2,
            (TitanError::WriteTimeout(d1), TitanError::WriteTimeout(d2)) => d1 == d2,
            (TitanError::Tls(s1), TitanError::Tls(s2)) => s1 == s2,
            (TitanError::Config(s1), TitanError::Config(s2)) => s1 == s2,
            (TitanError::ConnectionNotFound(a), TitanError::ConnectionNotFound(b)) => a == b,
            (TitanError::ConnectionClosed(a), TitanError::ConnectionClosed(b)) => a == b,
            (TitanError::Delivery(s1), TitanError::Delivery(s2)) => s1 == s2,
            (TitanError::Internal(s1), TitanError::Internal(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for TitanError {
    fn from(e: std::io::Error) -> Self {
        TitanError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for TitanError {
    fn from(e: rustls::Error) -> Self {
        TitanError::Tls(e.to_string())
    }
}

impl From<serde_json::Error> for TitanError {
    fn from(e: serde_json::Error) -> Self {
        TitanError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
