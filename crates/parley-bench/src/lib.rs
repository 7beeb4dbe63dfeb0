//! Shared fixtures for the Parley benchmarks.

use parley_core::{InMemoryMessageStore, MessagePipeline, PresenceNotifier, PresenceRegistry};
use parley_protocol::{Frame, UserId};
use parley_transport::{ConnectionId, PushConnection, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Push connection that counts frames and drops them.
#[derive(Debug)]
pub struct CountingConnection {
    id: ConnectionId,
    frames: AtomicU64,
}

impl CountingConnection {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::generate(),
            frames: AtomicU64::new(0),
        })
    }

    /// Frames received so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PushConnection for CountingConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, _frame: Frame) -> Result<(), TransportError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// A pipeline over an in-memory store, with `online` users registered.
pub struct Fixture {
    pub presence: Arc<PresenceRegistry>,
    pub store: Arc<InMemoryMessageStore>,
    pub pipeline: MessagePipeline,
    pub users: Vec<UserId>,
}

impl Fixture {
    #[must_use]
    pub fn new(online: usize) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let pipeline = MessagePipeline::new(
            store.clone(),
            Arc::new(PresenceNotifier::new(Arc::clone(&presence))),
        );

        let users: Vec<_> = (0..online.max(2)).map(|_| UserId::generate()).collect();
        for user in users.iter().take(online) {
            presence.register(user.clone(), CountingConnection::new());
        }

        Self {
            presence,
            store,
            pipeline,
            users,
        }
    }
}
