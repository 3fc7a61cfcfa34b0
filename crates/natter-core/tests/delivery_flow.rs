//! End-to-end delivery flows through the hub: fanout, acks, status
//! aggregation, presence, and reconnect replay, all over in-memory
//! collaborators and stub connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use natter_core::{
    AckStatus, Connection, ConnectionId, CoreConfig, Hub, InMemoryDirectory,
    InMemoryMessageRepository, MembershipDirectory, MessagePayload, MessageRepository,
    MessageStatus, NatterError, NewMessage, ParticipantScope, Result, ServerEvent,
};

struct TestConnection {
    id: ConnectionId,
    sent: Mutex<Vec<ServerEvent>>,
    broken: AtomicBool,
}

impl TestConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            sent: Mutex::new(Vec::new()),
            broken: AtomicBool::new(false),
        })
    }

    fn take(&self) -> Vec<ServerEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn break_link(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connection for TestConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, event: &ServerEvent) -> Result<()> {
        if self.broken.load(Ordering::Relaxed) {
            return Err(NatterError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<()> {
        Ok(())
    }
}

struct FailingRepository;

#[async_trait]
impl MessageRepository for FailingRepository {
    async fn create_message(&self, _message: NewMessage) -> Result<()> {
        Err(NatterError::Repository("storage offline".into()))
    }

    async fn update_status(&self, _message_id: &str, _status: MessageStatus) -> Result<()> {
        Err(NatterError::Repository("storage offline".into()))
    }
}

struct FailingDirectory;

#[async_trait]
impl MembershipDirectory for FailingDirectory {
    async fn participant_count(&self, _chat_id: &str) -> Result<usize> {
        Err(NatterError::Directory("directory offline".into()))
    }

    async fn chat_exists(&self, _chat_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn identity_exists(&self, _identity: &str) -> Result<bool> {
        Ok(true)
    }
}

fn hub_with(
    scope: ParticipantScope,
) -> (Arc<Hub>, Arc<InMemoryMessageRepository>, Arc<InMemoryDirectory>) {
    let repository = Arc::new(InMemoryMessageRepository::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let hub = Hub::new(
        CoreConfig::default().with_scope(scope),
        repository.clone(),
        directory.clone(),
    );
    (Arc::new(hub), repository, directory)
}

async fn attach(hub: &Hub, identity: &str) -> Arc<TestConnection> {
    let conn = TestConnection::new();
    hub.attach(identity, conn.clone()).await.unwrap();
    conn
}

async fn frame(hub: &Hub, chat_id: &str, identity: &str, conn: &Arc<TestConnection>, text: &str) {
    let connection: Arc<dyn Connection> = conn.clone();
    hub.handle_frame(chat_id, identity, &connection, text)
        .await
        .unwrap();
}

fn statuses(events: &[ServerEvent]) -> Vec<MessageStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Status { payload } => Some(payload.status),
            _ => None,
        })
        .collect()
}

fn acks(events: &[ServerEvent]) -> Vec<(String, AckStatus, Option<String>)> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Ack {
                message_id,
                status,
                by,
            } => Some((message_id.clone(), *status, by.clone())),
            _ => None,
        })
        .collect()
}

fn system_contents(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::System { message } => Some(message.content.clone()),
            _ => None,
        })
        .collect()
}

fn messages(events: &[ServerEvent]) -> Vec<MessagePayload> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Message { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_message_and_seen_end_to_end() {
    let (hub, repository, _) = hub_with(ParticipantScope::Global);

    // 1. Alice and Bob connect.
    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice.take();
    bob.take();

    // 2. Alice sends a message.
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;

    // 3. Bob receives the message event.
    let bob_events = bob.take();
    let received = messages(&bob_events);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, "m1");
    assert_eq!(received[0].from, "alice");
    assert_eq!(received[0].content, "hi");

    // 4. Alice got received then delivered, and the initial status.
    let alice_events = alice.take();
    assert_eq!(
        acks(&alice_events),
        vec![
            ("m1".to_string(), AckStatus::Received, None),
            ("m1".to_string(), AckStatus::Delivered, None),
        ]
    );
    assert_eq!(statuses(&alice_events), vec![MessageStatus::Sent]);

    // 5. Bob marks the message seen; Alice gets the attributed ack.
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;

    let alice_events = alice.take();
    assert_eq!(
        acks(&alice_events),
        vec![("m1".to_string(), AckStatus::Seen, Some("bob".to_string()))]
    );
    // Bob is the whole universe under global scope, so seen_all.
    assert_eq!(statuses(&alice_events), vec![MessageStatus::SeenAll]);

    // 6. The persisted row followed the recomputation.
    assert_eq!(
        repository.status_of("m1").await,
        Some(MessageStatus::SeenAll)
    );
    assert_eq!(hub.counts("m1", "room1").await, (0, 1, 1));
}

#[tokio::test]
async fn test_sender_other_devices_receive_the_message() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let phone = attach(&hub, "alice").await;
    let laptop = attach(&hub, "alice").await;
    phone.take();
    laptop.take();

    frame(
        &hub,
        "room1",
        "alice",
        &phone,
        r#"{"type":"message","id":"m1","content":"from my phone"}"#,
    )
    .await;

    // Only the originating connection misses the fanout.
    assert!(messages(&phone.take()).is_empty());
    let laptop_events = laptop.take();
    assert_eq!(messages(&laptop_events).len(), 1);
    // Acks go to the identity, so both devices see them.
    assert_eq!(acks(&laptop_events).len(), 2);
}

#[tokio::test]
async fn test_empty_content_rejected_to_origin_only() {
    let (hub, repository, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice.take();
    bob.take();

    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","content":"   "}"#,
    )
    .await;

    let alice_events = alice.take();
    assert!(matches!(
        &alice_events[..],
        [ServerEvent::Error { message }] if message == "empty content"
    ));
    assert!(bob.take().is_empty());
    assert!(repository.is_empty().await);
}

#[tokio::test]
async fn test_unknown_and_malformed_events() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice.take();
    bob.take();

    frame(&hub, "room1", "alice", &alice, r#"{"type":"zap","payload":1}"#).await;
    let events = alice.take();
    assert!(matches!(
        &events[..],
        [ServerEvent::Error { message }] if message == "unknown event"
    ));

    frame(&hub, "room1", "alice", &alice, "not even json").await;
    let events = alice.take();
    assert!(matches!(
        &events[..],
        [ServerEvent::Error { message }] if message == "malformed event"
    ));

    // Protocol errors never leak to other connections.
    assert!(bob.take().is_empty());
}

#[tokio::test]
async fn test_presence_announcements_first_and_last() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    alice.take();

    // First connection announces the join to everyone else.
    let bob_phone = attach(&hub, "bob").await;
    assert_eq!(
        system_contents(&alice.take()),
        vec!["bob joined the chat".to_string()]
    );

    // A second device is silent.
    let bob_laptop = attach(&hub, "bob").await;
    assert!(system_contents(&alice.take()).is_empty());

    // Dropping one device is silent; dropping the last announces.
    hub.detach("bob", bob_phone.id()).await;
    assert!(system_contents(&alice.take()).is_empty());

    hub.detach("bob", bob_laptop.id()).await;
    assert_eq!(
        system_contents(&alice.take()),
        vec!["bob left the chat".to_string()]
    );
}

#[tokio::test]
async fn test_failed_connection_is_pruned_and_departure_announced() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    let carol = attach(&hub, "carol").await;
    alice.take();
    bob.take();
    carol.take();

    carol.break_link();

    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;

    // Bob still got the message; Carol was pruned and her departure
    // announced to the survivors.
    let bob_events = bob.take();
    assert_eq!(messages(&bob_events).len(), 1);
    assert_eq!(
        system_contents(&bob_events),
        vec!["carol left the chat".to_string()]
    );
    assert!(!hub.registry().is_connected("carol").await);

    let alice_events = alice.take();
    assert_eq!(
        system_contents(&alice_events),
        vec!["carol left the chat".to_string()]
    );
    // The pruned identity no longer counts toward the universe.
    let status = alice_events.iter().find_map(|event| match event {
        ServerEvent::Status { payload } => Some(payload.clone()),
        _ => None,
    });
    let status = status.expect("status event");
    assert_eq!(status.total_participants, 1);
}

#[tokio::test]
async fn test_history_snapshot_on_connect() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"one"}"#,
    )
    .await;
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m2","content":"two"}"#,
    )
    .await;

    let bob = attach(&hub, "bob").await;
    let events = bob.take();
    match &events[0] {
        ServerEvent::History { messages } => {
            let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids, vec!["m1", "m2"]);
        }
        other => panic!("expected history first, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_replays_seen_acks_without_status_recompute() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    // 1. Alice sends a message and goes offline.
    let alice = attach(&hub, "alice").await;
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hello"}"#,
    )
    .await;
    hub.detach("alice", alice.id()).await;

    // 2. Bob and Carol arrive, read the history, and mark it seen.
    let bob = attach(&hub, "bob").await;
    let carol = attach(&hub, "carol").await;
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;
    frame(&hub, "room1", "carol", &carol, r#"{"type":"seen","messageId":"m1"}"#).await;
    bob.take();
    carol.take();

    // 3. Alice reconnects: history, then one seen ack per reader, and
    //    nothing else.
    let alice2 = attach(&hub, "alice").await;
    let events = alice2.take();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        ServerEvent::History { messages } if messages.len() == 1
    ));
    assert_eq!(
        acks(&events[1..]),
        vec![
            ("m1".to_string(), AckStatus::Seen, Some("bob".to_string())),
            ("m1".to_string(), AckStatus::Seen, Some("carol".to_string())),
        ]
    );
    assert!(statuses(&events).is_empty());

    // 4. The replay stayed between the hub and Alice.
    assert_eq!(
        system_contents(&bob.take()),
        vec!["alice joined the chat".to_string()]
    );
    assert!(statuses(&carol.take()).is_empty());
}

#[tokio::test]
async fn test_status_progression_under_per_chat_scope() {
    let (hub, repository, directory) = hub_with(ParticipantScope::PerChat);
    directory.register_chat("room1", &["alice", "bob", "carol"]).await;

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    let carol = attach(&hub, "carol").await;
    alice.take();
    bob.take();
    carol.take();

    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;
    frame(
        &hub,
        "room1",
        "bob",
        &bob,
        r#"{"type":"ack","messageId":"m1","status":"delivered"}"#,
    )
    .await;
    frame(
        &hub,
        "room1",
        "carol",
        &carol,
        r#"{"type":"ack","messageId":"m1","status":"delivered"}"#,
    )
    .await;
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;
    frame(&hub, "room1", "carol", &carol, r#"{"type":"seen","messageId":"m1"}"#).await;

    assert_eq!(
        statuses(&alice.take()),
        vec![
            MessageStatus::Sent,
            MessageStatus::DeliveredPartial,
            MessageStatus::DeliveredAll,
            MessageStatus::SeenPartial,
            MessageStatus::SeenAll,
        ]
    );
    assert_eq!(
        repository.status_of("m1").await,
        Some(MessageStatus::SeenAll)
    );
    assert_eq!(hub.counts("m1", "room1").await, (2, 2, 2));
}

#[tokio::test]
async fn test_duplicate_seen_is_a_complete_noop() {
    let (hub, repository, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;
    let persisted = repository.status_of("m1").await;
    alice.take();
    bob.take();

    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;

    assert!(alice.take().is_empty());
    assert!(bob.take().is_empty());
    assert_eq!(repository.status_of("m1").await, persisted);
    assert_eq!(hub.counts("m1", "room1").await, (0, 1, 1));
}

#[tokio::test]
async fn test_own_and_untracked_seen_are_ignored() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;
    alice.take();
    bob.take();

    // The owner reading their own message changes nothing.
    frame(&hub, "room1", "alice", &alice, r#"{"type":"seen","messageId":"m1"}"#).await;
    // Nor does a receipt for a message nobody sent.
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"ghost"}"#).await;

    assert!(alice.take().is_empty());
    assert!(bob.take().is_empty());
    assert_eq!(hub.counts("m1", "room1").await, (0, 0, 1));
}

#[tokio::test]
async fn test_typing_relay_skips_origin_connection() {
    let (hub, _, _) = hub_with(ParticipantScope::Global);

    let alice_phone = attach(&hub, "alice").await;
    let alice_laptop = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice_phone.take();
    alice_laptop.take();
    bob.take();

    frame(
        &hub,
        "room1",
        "alice",
        &alice_phone,
        r#"{"type":"typing","payload":{"identity":"alice","isTyping":true}}"#,
    )
    .await;

    assert!(alice_phone.take().is_empty());
    assert!(matches!(
        &alice_laptop.take()[..],
        [ServerEvent::Typing { .. }]
    ));
    assert!(matches!(&bob.take()[..], [ServerEvent::Typing { .. }]));
}

#[tokio::test]
async fn test_repository_failure_never_blocks_delivery() {
    let directory = Arc::new(InMemoryDirectory::new());
    let hub = Hub::new(
        CoreConfig::default(),
        Arc::new(FailingRepository),
        directory,
    );

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice.take();
    bob.take();

    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;

    // The in-memory path stayed authoritative end to end.
    let alice_events = alice.take();
    assert_eq!(acks(&alice_events).len(), 3);
    assert_eq!(
        statuses(&alice_events),
        vec![MessageStatus::Sent, MessageStatus::SeenAll]
    );
}

#[tokio::test]
async fn test_directory_failure_defaults_to_empty_universe() {
    let hub = Hub::new(
        CoreConfig::default().with_scope(ParticipantScope::PerChat),
        Arc::new(InMemoryMessageRepository::new()),
        Arc::new(FailingDirectory),
    );

    let alice = attach(&hub, "alice").await;
    let bob = attach(&hub, "bob").await;
    alice.take();
    bob.take();

    frame(
        &hub,
        "room1",
        "alice",
        &alice,
        r#"{"type":"message","id":"m1","content":"hi"}"#,
    )
    .await;
    frame(&hub, "room1", "bob", &bob, r#"{"type":"seen","messageId":"m1"}"#).await;

    let alice_events = alice.take();
    for event in &alice_events {
        if let ServerEvent::Status { payload } = event {
            assert_eq!(payload.total_participants, 0);
            assert_eq!(payload.status, MessageStatus::Sent);
        }
    }
    assert_eq!(statuses(&alice_events).len(), 2);
}
