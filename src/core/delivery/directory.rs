// src/core/delivery/directory.rs

//! Maps a user to the single connection currently representing it.

use crate::core::ConnectionId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// The user-to-connection directory.
///
/// The first association for a user wins until it is explicitly removed, so a
/// user connecting from a second device keeps being routed to the first one.
#[derive(Debug, Default)]
pub struct Directory {
    entries: DashMap<String, ConnectionId>,
}

impl Directory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records `connection_id` for `user_id` if the user has no entry yet.
    /// Returns `true` if an entry was created.
    pub fn associate(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        match self.entries.entry(user_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(connection_id);
                true
            }
        }
    }

    /// Removes the user's entry, whatever connection it points at.
    pub fn disassociate(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries.remove(user_id).map(|(_, id)| id)
    }

    /// Removes the user's entry only if it still points at `connection_id`.
    pub fn disassociate_connection(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        self.entries
            .remove_if(user_id, |_, current| *current == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries.get(user_id).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
