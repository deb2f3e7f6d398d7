//! Inbound bus pipeline flows: locality filtering, poison handling and the
//! enrich → broadcast → re-publish path, driven with in-memory stubs.
use async_trait::async_trait;
use bytes::Bytes;
use delivery::bus::binder::MessageBinder;
use delivery::bus::dispatcher::{EventDispatcher, Publisher};
use delivery::bus::{InboundMessage, META_ROUTING_KEY};
use delivery::contacts::{ContactDirectory, ContactQuery, ContactRecord};
use delivery::enricher::PeerEnricher;
use delivery::service::DeliveryService;
use herald_common::ids::UserId;
use herald_registry::event::EventPayload;
use herald_registry::{Hub, HubConfig};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct StubDirectory {
    record: ContactRecord,
}

#[async_trait]
impl ContactDirectory for StubDirectory {
    async fn search(&self, _query: ContactQuery) -> anyhow::Result<Vec<ContactRecord>> {
        Ok(vec![self.record.clone()])
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingPublisher {
    fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .expect("lock")
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        self.published
            .lock()
            .expect("lock")
            .push((topic.to_string(), payload));
        Ok(())
    }
}

struct Harness {
    hub: Arc<Hub>,
    service: DeliveryService,
    binder: MessageBinder,
    publisher: Arc<RecordingPublisher>,
}

fn harness(record: ContactRecord) -> Harness {
    let hub = Hub::new(HubConfig::default());
    let service = DeliveryService::new(Arc::clone(&hub));
    let enricher = Arc::new(PeerEnricher::new(Arc::new(StubDirectory { record }), 128));
    let publisher = Arc::new(RecordingPublisher::default());
    let dispatcher = Arc::new(EventDispatcher::new(
        publisher.clone(),
        Duration::from_secs(2),
    ));
    let binder = MessageBinder::new(Arc::clone(&hub), enricher, dispatcher);
    Harness {
        hub,
        service,
        binder,
        publisher,
    }
}

fn delivery_for(user: UserId, payload: &str) -> InboundMessage {
    InboundMessage {
        id: "delivery-1".into(),
        metadata: HashMap::from([(
            META_ROUTING_KEY.to_string(),
            format!("x.{user}.x"),
        )]),
        payload: Bytes::from(payload.to_string()),
    }
}

fn message_payload(user: UserId) -> String {
    format!(
        r#"{{
            "message_id": "6a4f4b66-7a87-4e20-90e1-a2e3226e077e",
            "thread_id": "0d4c6f0c-4a85-4c44-8b76-aabcaa3e6ecc",
            "domain_id": 5,
            "from": {{"id": "8f5c1e96-d1fd-4b48-9f2f-0cb1e11b6a52", "type": 1}},
            "to": {{"id": "{user}", "type": 1}},
            "body": "hello there",
            "occurred_at": "2024-05-02T10:30:00Z"
        }}"#
    )
}

#[tokio::test]
async fn remote_users_are_acknowledged_without_dispatch() {
    let h = harness(ContactRecord::default());
    let user = UserId::from_str("11111111-1111-1111-1111-111111111111").expect("uuid");

    let msg = delivery_for(user, &message_payload(user));
    h.binder.on_message_created(msg).await.expect("ack");

    // Another node owns this user: nothing published, nothing local.
    assert!(h.publisher.topics().is_empty());
    assert!(!h.hub.is_connected(user));
    h.hub.shutdown();
}

#[tokio::test]
async fn unroutable_deliveries_are_acknowledged() {
    let h = harness(ContactRecord::default());
    let msg = InboundMessage {
        id: "delivery-2".into(),
        metadata: HashMap::from([(META_ROUTING_KEY.to_string(), "a.b.c".to_string())]),
        payload: Bytes::from_static(b"{}"),
    };
    h.binder.on_message_created(msg).await.expect("ack");
    assert!(h.publisher.topics().is_empty());
    h.hub.shutdown();
}

#[tokio::test]
async fn poison_payloads_are_acknowledged_once_decoded_fails() {
    let h = harness(ContactRecord::default());
    let user = UserId::new();
    let session = CancellationToken::new();
    let conn = h.service.subscribe(&session, user);

    let msg = delivery_for(user, "definitely-not-json");
    h.binder.on_message_created(msg).await.expect("ack");

    assert!(h.publisher.topics().is_empty());
    let nothing = tokio::time::timeout(Duration::from_millis(100), conn.recv()).await;
    assert!(nothing.is_err(), "no event reaches the session");
    h.hub.shutdown();
}

#[tokio::test]
async fn local_delivery_is_enriched_broadcast_and_republished() {
    let h = harness(ContactRecord {
        name: "Alice".into(),
        username: "alice".into(),
        subject: "alice-sub".into(),
        issuer_id: "https://auth.example".into(),
    });
    let user = UserId::new();
    let session = CancellationToken::new();
    let conn = h.service.subscribe(&session, user);

    let msg = delivery_for(user, &message_payload(user));
    h.binder.on_message_created(msg).await.expect("handled");

    // Local fan-out carries the enriched participants.
    let ev = tokio::time::timeout(Duration::from_secs(1), conn.recv())
        .await
        .expect("recv in time")
        .expect("event");
    let EventPayload::MessageCreated(message) = ev.payload() else {
        panic!("expected message payload");
    };
    assert_eq!(message.text, "hello there");
    assert_eq!(message.to.name.as_deref(), Some("Alice"));
    assert_eq!(message.to.sub.as_deref(), Some("alice-sub"));

    // Global re-publication lands on the enriched routing key.
    assert_eq!(
        h.publisher.topics(),
        vec!["im_delivery.v1.5.contact.alice-sub.message.created".to_string()]
    );
    h.hub.shutdown();
}

#[tokio::test]
async fn bot_issuers_are_classified_on_the_outbound_topic() {
    let h = harness(ContactRecord {
        name: "Helper".into(),
        username: "helper".into(),
        subject: "helper-sub".into(),
        issuer_id: "acme-BOT-platform".into(),
    });
    let user = UserId::new();
    let session = CancellationToken::new();
    let _conn = h.service.subscribe(&session, user);

    let msg = delivery_for(user, &message_payload(user));
    h.binder.on_message_created(msg).await.expect("handled");

    assert_eq!(
        h.publisher.topics(),
        vec!["im_delivery.v1.5.bot.helper-sub.message.created".to_string()]
    );
    h.hub.shutdown();
}
