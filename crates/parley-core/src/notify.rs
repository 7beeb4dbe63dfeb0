//! Best-effort live delivery.
//!
//! Notification runs after a message is durable. It never retries,
//! never queues for later, and never reports failure to the sender.

use crate::presence::PresenceRegistry;
use parley_protocol::{ChatMessage, Frame, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a live push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the receiver's live connection.
    Delivered,
    /// The receiver had no live connection.
    Offline,
    /// The receiver was online but the push could not be queued.
    Failed,
}

/// Pushes persisted messages to their receivers.
pub trait Notifier: Send + Sync {
    /// Push `message` to `receiver` if they are reachable.
    fn notify(&self, receiver: &UserId, message: &ChatMessage) -> Delivery;
}

/// Notifier that looks receivers up in the presence registry.
#[derive(Debug, Clone)]
pub struct PresenceNotifier {
    presence: Arc<PresenceRegistry>,
}

impl PresenceNotifier {
    /// Create a notifier reading from `presence`.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }
}

impl Notifier for PresenceNotifier {
    fn notify(&self, receiver: &UserId, message: &ChatMessage) -> Delivery {
        let Some(connection) = self.presence.lookup(receiver) else {
            debug!(receiver = %receiver, message = %message.id, "Receiver offline, skipping push");
            return Delivery::Offline;
        };

        let frame = match Frame::new_message(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(receiver = %receiver, message = %message.id, error = %e, "Push encoding failed");
                return Delivery::Failed;
            }
        };

        match connection.send(frame) {
            Ok(()) => {
                debug!(receiver = %receiver, connection = %connection.id(), message = %message.id, "Pushed message");
                Delivery::Delivered
            }
            Err(e) => {
                warn!(receiver = %receiver, connection = %connection.id(), error = %e, "Push failed");
                Delivery::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{events, SenderRef};
    use parley_transport::{ConnectionId, PushConnection, TransportError};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct RecordingConnection {
        id: ConnectionId,
        fail: bool,
        frames: Mutex<Vec<Frame>>,
    }

    impl RecordingConnection {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::generate(),
                fail,
                frames: Mutex::new(Vec::new()),
            })
        }
    }

    impl PushConnection for RecordingConnection {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        fn send(&self, frame: Frame) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::ConnectionClosed);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn is_open(&self) -> bool {
            !self.fail
        }
    }

    fn message(receiver: &UserId) -> ChatMessage {
        ChatMessage {
            id: "m1".into(),
            sender_id: SenderRef::Id(UserId::generate()),
            receiver_id: receiver.clone(),
            text: Some("hi".into()),
            image: None,
            created_at: 1,
        }
    }

    #[test]
    fn test_offline_receiver() {
        let notifier = PresenceNotifier::new(Arc::new(PresenceRegistry::new()));
        let receiver = UserId::generate();
        assert_eq!(notifier.notify(&receiver, &message(&receiver)), Delivery::Offline);
    }

    #[test]
    fn test_delivers_new_message_event() {
        let presence = Arc::new(PresenceRegistry::new());
        let receiver = UserId::generate();
        let conn = RecordingConnection::new(false);
        presence.register(receiver.clone(), conn.clone());

        let notifier = PresenceNotifier::new(presence);
        assert_eq!(notifier.notify(&receiver, &message(&receiver)), Delivery::Delivered);

        let frames = conn.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Event { event, .. } if event == events::NEW_MESSAGE));
    }

    #[test]
    fn test_failed_push_is_reported_not_raised() {
        let presence = Arc::new(PresenceRegistry::new());
        let receiver = UserId::generate();
        presence.register(receiver.clone(), RecordingConnection::new(true));

        let notifier = PresenceNotifier::new(presence);
        assert_eq!(notifier.notify(&receiver, &message(&receiver)), Delivery::Failed);
    }
}
