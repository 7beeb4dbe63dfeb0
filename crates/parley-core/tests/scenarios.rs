//! End-to-end behavior of the presence registry, pipeline, and limiter
//! chains working together.

use parley_core::{
    Delivery, InMemoryMessageStore, MessagePipeline, MessageStore, Outcome, PresenceNotifier,
    PresenceRegistry, RateLimitRule, RateLimiterChain, RequestContext, SendRequest,
};
use parley_protocol::{events, Frame, SenderProfile, SenderRef, UserId};
use parley_transport::{ConnectionId, PushConnection, TransportError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
struct TestConnection {
    id: ConnectionId,
    broken: bool,
    frames: Mutex<Vec<Frame>>,
}

impl TestConnection {
    fn open(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            broken: false,
            frames: Mutex::new(Vec::new()),
        })
    }

    fn broken(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            broken: true,
            frames: Mutex::new(Vec::new()),
        })
    }

    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl PushConnection for TestConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::SendFailed("socket reset".into()));
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.broken
    }
}

struct Harness {
    presence: Arc<PresenceRegistry>,
    store: Arc<InMemoryMessageStore>,
    pipeline: MessagePipeline,
}

fn harness() -> Harness {
    let presence = Arc::new(PresenceRegistry::new());
    let store = Arc::new(InMemoryMessageStore::new());
    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(PresenceNotifier::new(Arc::clone(&presence))),
    );
    Harness {
        presence,
        store,
        pipeline,
    }
}

fn text(sender: &UserId, receiver: &UserId, body: &str) -> SendRequest {
    SendRequest {
        sender: sender.clone(),
        receiver: receiver.to_string(),
        text: Some(body.to_string()),
        image: None,
    }
}

#[tokio::test]
async fn connected_pair_exchange_pushes_once() {
    let h = harness();
    let (alice, bob) = (UserId::generate(), UserId::generate());
    h.store.upsert_profile(SenderProfile {
        id: alice.clone(),
        full_name: "Alice".into(),
        profile_pic: None,
    });

    let alice_conn = TestConnection::open("alice-1");
    let bob_conn = TestConnection::open("bob-1");
    h.presence.register(alice.clone(), alice_conn.clone());
    h.presence.register(bob.clone(), bob_conn.clone());

    let outcome = h.pipeline.send(text(&alice, &bob, "hi")).await.unwrap();
    assert_eq!(outcome.message.sender_id, SenderRef::Id(alice.clone()));
    assert_eq!(outcome.delivery, Delivery::Delivered);

    let pushed = bob_conn.frames();
    assert_eq!(pushed.len(), 1);
    match &pushed[0] {
        Frame::Event { event, payload } => {
            assert_eq!(event, events::NEW_MESSAGE);
            assert_eq!(payload, &serde_json::to_value(&outcome.message).unwrap());
        }
        other => panic!("Expected Event frame, got {:?}", other),
    }
    assert!(alice_conn.frames().is_empty());
}

#[tokio::test]
async fn offline_receiver_still_gets_history() {
    let h = harness();
    let (alice, bob) = (UserId::generate(), UserId::generate());

    let outcome = h.pipeline.send(text(&alice, &bob, "later")).await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Offline);

    let history = h.pipeline.history(&bob, alice.as_str()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, outcome.message.id);
}

#[tokio::test]
async fn broken_push_does_not_affect_durable_record() {
    let h = harness();
    let (alice, bob) = (UserId::generate(), UserId::generate());
    h.presence.register(bob.clone(), TestConnection::broken("bob-1"));

    let outcome = h.pipeline.send(text(&alice, &bob, "hi")).await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Failed);

    let history = h.store.query_by_participants(&alice, &bob).await.unwrap();
    let matching = history.iter().filter(|m| m.id == outcome.message.id).count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn pushed_message_is_already_in_history() {
    let h = harness();
    let (alice, bob) = (UserId::generate(), UserId::generate());
    let bob_conn = TestConnection::open("bob-1");
    h.presence.register(bob.clone(), bob_conn.clone());

    for body in ["one", "two", "three"] {
        h.pipeline.send(text(&alice, &bob, body)).await.unwrap();
    }

    let history = h.pipeline.history(&bob, alice.as_str()).await.unwrap();
    let history_ids: Vec<_> = history.iter().map(|m| m.id.clone()).collect();
    for frame in bob_conn.frames() {
        let Frame::Event { payload, .. } = frame else {
            panic!("unexpected frame");
        };
        let id = payload["_id"].as_str().unwrap().to_string();
        assert!(history_ids.contains(&id));
    }
}

#[tokio::test]
async fn reconnect_replaces_entry_and_stale_disconnect_is_ignored() {
    let h = harness();
    let (alice, bob) = (UserId::generate(), UserId::generate());

    let stale = TestConnection::open("bob-old");
    let fresh = TestConnection::open("bob-new");
    h.presence.register(bob.clone(), stale.clone());
    let replaced = h.presence.register(bob.clone(), fresh.clone()).unwrap();
    assert_eq!(replaced.id().as_str(), "bob-old");

    // The old socket's disconnect arrives late.
    assert!(!h.presence.remove(&bob, stale.id()));

    h.pipeline.send(text(&alice, &bob, "hi")).await.unwrap();
    assert!(stale.frames().is_empty());
    assert_eq!(fresh.frames().len(), 1);
}

fn login_attempt(ip: &str, email: &str) -> RequestContext {
    RequestContext::new(ip).with_account(Some(email))
}

#[tokio::test(start_paused = true)]
async fn account_brute_force_is_locked_out_across_ips() {
    let chain = RateLimiterChain::login(
        RateLimitRule::per_ip(FIFTEEN_MINUTES, 50),
        RateLimitRule::failed_attempts_per_account(FIFTEEN_MINUTES, 5),
    );

    for i in 0..3 {
        chain
            .evaluate(&login_attempt(&format!("198.51.100.{i}"), "bob@example.com"))
            .unwrap()
            .record(Outcome::Failure);
    }

    // The real owner logs in fine; it neither resets nor adds to the count.
    chain
        .evaluate(&login_attempt("192.0.2.1", "bob@example.com"))
        .unwrap()
        .record(Outcome::Success);

    for i in 3..5 {
        chain
            .evaluate(&login_attempt(&format!("198.51.100.{i}"), "bob@example.com"))
            .unwrap()
            .record(Outcome::Failure);
    }

    let err = chain
        .evaluate(&login_attempt("192.0.2.1", " BOB@example.com"))
        .unwrap_err();
    assert_eq!(err.stage, "login-account");
    assert!(err.retry_after_secs() > 0);
}

#[tokio::test(start_paused = true)]
async fn signup_flood_from_one_ip() {
    let chain = RateLimiterChain::signup(RateLimitRule::per_ip(FIFTEEN_MINUTES, 10));
    let ctx = RequestContext::new("203.0.113.77");

    for _ in 0..10 {
        chain.evaluate(&ctx).unwrap().record(Outcome::Failure);
        tokio::time::advance(Duration::from_secs(30)).await;
    }

    let err = chain.evaluate(&ctx).unwrap_err();
    assert!(err.retry_after_secs() > 0);
    assert_eq!(err.retry_after_secs(), 15 * 60 - 10 * 30);

    // Another address is unaffected.
    assert!(chain.evaluate(&RequestContext::new("203.0.113.78")).is_ok());
}
