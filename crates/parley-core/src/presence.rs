//! Presence tracking for Parley.
//!
//! The registry maps each user to the one push connection currently
//! reaching them. A newer connection for the same user replaces the older
//! one, and a disconnect only removes the entry it actually owns.

use dashmap::DashMap;
use parley_protocol::UserId;
use parley_transport::{ConnectionId, PushConnection};
use std::sync::Arc;
use tracing::debug;

/// A push connection shared between the registry and its socket task.
pub type SharedConnection = Arc<dyn PushConnection>;

/// Registry of online users and their push connections.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, SharedConnection>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` as the push channel for `user`.
    ///
    /// Always overwrites. Returns the connection it replaced, if any, so the
    /// caller can close the stale channel.
    pub fn register(&self, user: UserId, connection: SharedConnection) -> Option<SharedConnection> {
        let connection_id = connection.id().clone();
        let previous = self.entries.insert(user.clone(), connection);

        match &previous {
            Some(old) => debug!(
                user = %user,
                connection = %connection_id,
                replaced = %old.id(),
                "Presence: connection replaced"
            ),
            None => debug!(user = %user, connection = %connection_id, "Presence: user online"),
        }

        previous
    }

    /// Get the connection currently registered for `user`.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<SharedConnection> {
        self.entries.get(user).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `user`'s entry if it is still owned by `connection`.
    ///
    /// Returns `true` if an entry was removed. A stale connection whose
    /// entry was already replaced leaves the newer entry untouched.
    pub fn remove(&self, user: &UserId, connection: &ConnectionId) -> bool {
        let removed = self
            .entries
            .remove_if(user, |_, current| current.id() == connection)
            .is_some();

        if removed {
            debug!(user = %user, connection = %connection, "Presence: user offline");
        } else {
            debug!(user = %user, connection = %connection, "Presence: stale disconnect ignored");
        }

        removed
    }

    /// Check if a user has a registered connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    /// All users with a registered connection, sorted by id.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// All registered connections.
    #[must_use]
    pub fn connections(&self) -> Vec<SharedConnection> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Get the number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no one is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
