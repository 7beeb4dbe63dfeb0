//! Durable message storage contract.
//!
//! The pipeline only needs two things from storage: insert a message and
//! get back the persisted record, and list a pair's conversation in
//! creation order. [`InMemoryMessageStore`] is the process-local
//! implementation the server runs with.

use async_trait::async_trait;
use dashmap::DashMap;
use parley_protocol::{generate_id, ChatMessage, SenderProfile, SenderRef, UserId};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("Storage failure: {0}")]
    Backend(String),
}

/// A validated message ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    pub receiver: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message.
    ///
    /// Storage assigns the id and creation time. The returned record may
    /// carry an expanded sender.
    async fn insert(&self, message: NewMessage) -> Result<ChatMessage, StorageError>;

    /// All messages exchanged between `a` and `b`, oldest first.
    async fn query_by_participants(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<ChatMessage>, StorageError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Process-local message store.
///
/// Inserted records are returned with the sender expanded to its profile
/// when one is known; history queries return bare senders.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
    profiles: DashMap<UserId, SenderProfile>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the profile joined onto a user's messages.
    pub fn upsert_profile(&self, profile: SenderProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Get the number of stored messages.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    fn expand(&self, sender: &UserId) -> SenderRef {
        match self.profiles.get(sender) {
            Some(profile) => SenderRef::Profile(profile.value().clone()),
            None => SenderRef::Id(sender.clone()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<ChatMessage, StorageError> {
        let mut messages = self.messages.write().await;

        // Keep creation times non-decreasing in insertion order.
        let floor = messages.last().map_or(0, |m| m.created_at);
        let record = ChatMessage {
            id: generate_id(),
            sender_id: SenderRef::Id(message.sender.clone()),
            receiver_id: message.receiver,
            text: message.text,
            image: message.image,
            created_at: now_millis().max(floor),
        };
        messages.push(record.clone());
        drop(messages);

        trace!(message = %record.id, "Stored message");
        Ok(ChatMessage {
            sender_id: self.expand(&message.sender),
            ..record
        })
    }

    async fn query_by_participants(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect())
    }
}
