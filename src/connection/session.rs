// src/connection/session.rs

//! Defines the state associated with a single client session.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A session shared between the connection task and every message handler
/// running for that connection.
pub type SharedSession = Arc<Mutex<Session>>;

/// Holds the state specific to a single client connection.
#[derive(Debug, Default)]
pub struct Session {
    /// The user this connection authenticated as, once known.
    pub user_id: Option<String>,
    /// True once the connection has been released.
    pub closed: bool,
    /// Opaque values attached by upstream logic, e.g. authentication claims.
    data: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Session {
    /// Creates a new, unauthenticated `Session`.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Attaches a value under `key`, replacing any previous value.
    pub fn set<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.data.insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if it exists and has type `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.data
            .get(key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }
}
