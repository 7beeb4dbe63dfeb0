//! The send pipeline.
//!
//! Each send runs `Validate → Persist → Normalize → Broadcast`. Persist is
//! the commit point: once the store acknowledges the insert, the message
//! is the source of truth and the send succeeds whatever the broadcast
//! does. Broadcast only starts after the insert has completed, so a live
//! push is never ahead of history.

use crate::notify::{Delivery, Notifier};
use crate::store::{MessageStore, NewMessage, StorageError};
use parley_protocol::{ChatMessage, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Default maximum message text length, in characters.
pub const DEFAULT_MAX_TEXT_LEN: usize = 2000;

/// Invalid send input. Always fixable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Neither text nor image was supplied.
    #[error("Message text or image is required")]
    EmptyMessage,

    /// The receiver is not a well-formed user id.
    #[error("Invalid receiver ID")]
    InvalidReceiver(String),

    /// The text exceeds the configured limit.
    #[error("Message text exceeds {max} characters")]
    TextTooLong { max: usize },
}

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum message text length, in characters.
    pub max_text_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

/// A send as received from an authenticated caller.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Authenticated sender.
    pub sender: UserId,
    /// Receiver id exactly as the caller supplied it.
    pub receiver: String,
    /// Message body. Blank text counts as absent.
    pub text: Option<String>,
    /// Opaque reference to an already resolved image.
    pub image: Option<String>,
}

/// A completed send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The persisted, normalized message.
    pub message: ChatMessage,
    /// What happened to the live push.
    pub delivery: Delivery,
}

/// Validates, persists, and pushes direct messages.
#[derive(Clone)]
pub struct MessagePipeline {
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

impl MessagePipeline {
    /// Create a pipeline with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(store, notifier, PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Check a request and turn it into a storable message.
    ///
    /// Whitespace-only text and empty image references count as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if both text and image are absent, the receiver is
    /// malformed, or the text is too long.
    pub fn validate(&self, request: SendRequest) -> Result<NewMessage, ValidationError> {
        let text = request
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let image = request.image.filter(|i| !i.trim().is_empty());

        if text.is_none() && image.is_none() {
            return Err(ValidationError::EmptyMessage);
        }

        let receiver = UserId::parse(request.receiver.trim())
            .map_err(|e| ValidationError::InvalidReceiver(e.0))?;

        if let Some(t) = &text {
            if t.chars().count() > self.config.max_text_len {
                return Err(ValidationError::TextTooLong {
                    max: self.config.max_text_len,
                });
            }
        }

        Ok(NewMessage {
            sender: request.sender,
            receiver,
            text,
            image,
        })
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Returns a validation error before anything is stored, or a storage
    /// error if the insert fails. Push failures are never errors.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, PipelineError> {
        let new_message = self.validate(request)?;
        let sender = new_message.sender.clone();
        let receiver = new_message.receiver.clone();

        let stored = self.store.insert(new_message).await.map_err(|e| {
            error!(sender = %sender, receiver = %receiver, error = %e, "Persist failed");
            e
        })?;

        let message = stored.normalize();
        let delivery = self.notifier.notify(&receiver, &message);

        debug!(
            message = %message.id,
            sender = %sender,
            receiver = %receiver,
            delivery = ?delivery,
            "Message sent"
        );

        Ok(SendOutcome { message, delivery })
    }

    /// Conversation between `viewer` and `peer`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `peer` is malformed, or a storage error.
    pub async fn history(
        &self,
        viewer: &UserId,
        peer: &str,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let peer = UserId::parse(peer.trim()).map_err(|e| ValidationError::InvalidReceiver(e.0))?;
        let messages = self.store.query_by_participants(viewer, &peer).await?;
        Ok(messages.into_iter().map(ChatMessage::normalize).collect())
    }
}
