//! Event envelope flowing through the hub.
//!
//! # Purpose
//! One immutable unit of delivery: identity, routing target, kind, priority
//! and a tagged payload. The only mutable part is the single-shot marshal
//! cache, which lets every session of a user reuse one encoded frame.
use bytes::Bytes;
use herald_common::ids::{ConnId, UserId};
use herald_common::model::{ConnectedPayload, DisconnectedPayload, Message};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Classification of system and business events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(into = "i16")]
pub enum EventKind {
    Connected = 1,
    MessageCreated = 2,
    Disconnected = 3,
}

impl From<EventKind> for i16 {
    fn from(kind: EventKind) -> Self {
        kind as i16
    }
}

/// Priority drives the backpressure strategy: the higher the value, the
/// longer an event survives a saturated session queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(into = "i32")]
pub enum EventPriority {
    Low = 10,
    Normal = 20,
    High = 30,
}

impl From<EventPriority> for i32 {
    fn from(priority: EventPriority) -> Self {
        priority as i32
    }
}

/// Payload variants. A closed set keeps transport marshalling a pattern
/// match instead of a virtual call on the hot delivery loop.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    MessageCreated(Message),
    Connected(ConnectedPayload),
    Disconnected(DisconnectedPayload),
}

/// The unit of data moving through the registry.
///
/// Events are shared across sessions as `Arc<Event>` and never mutated
/// after construction; the marshal cache is populated at most once.
#[derive(Debug)]
pub struct Event {
    id: String,
    user_id: UserId,
    kind: EventKind,
    priority: EventPriority,
    /// Milliseconds since epoch.
    occurred_at: i64,
    payload: EventPayload,
    cached: OnceLock<Bytes>,
}

impl Event {
    /// Business event: a new message for one physical recipient.
    ///
    /// `user_id` is the routing target of this event instance; even when the
    /// message addresses a group, each subscriber gets its own event.
    pub fn message_created(message: Message, user_id: UserId) -> Self {
        Self {
            id: message.id.to_string(),
            user_id,
            kind: EventKind::MessageCreated,
            priority: EventPriority::High,
            occurred_at: message.created_at,
            payload: EventPayload::MessageCreated(message),
            cached: OnceLock::new(),
        }
    }

    /// Session handshake signal sent right after a subscribe.
    pub fn connected(user_id: UserId, conn_id: ConnId, server_version: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind: EventKind::Connected,
            priority: EventPriority::Normal,
            occurred_at: unix_millis(),
            payload: EventPayload::Connected(ConnectedPayload {
                ok: true,
                connection_id: conn_id.to_string(),
                server_version: server_version.to_string(),
            }),
            cached: OnceLock::new(),
        }
    }

    /// Terminal notice sent just before the server ends a session.
    /// High priority so it survives a saturated queue.
    pub fn disconnected(user_id: UserId, reason: &str, code: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind: EventKind::Disconnected,
            priority: EventPriority::High,
            occurred_at: unix_millis(),
            payload: EventPayload::Disconnected(DisconnectedPayload {
                reason: reason.to_string(),
                code: code.map(str::to_string),
            }),
            cached: OnceLock::new(),
        }
    }

    /// Universal factory for service-generated signals.
    pub fn system(
        user_id: UserId,
        kind: EventKind,
        priority: EventPriority,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind,
            priority,
            occurred_at: unix_millis(),
            payload,
            cached: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    pub fn occurred_at(&self) -> i64 {
        self.occurred_at
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Encoded frame from a previous marshal, if any.
    pub fn cached_frame(&self) -> Option<Bytes> {
        self.cached.get().cloned()
    }

    /// Store an encoded frame. The first writer wins; the stored frame is
    /// returned either way so callers can hand out one consistent buffer.
    pub fn store_frame(&self, frame: Bytes) -> Bytes {
        self.cached.get_or_init(|| frame).clone()
    }

    /// Bus topic for re-publication. `None` marks the event as local-only.
    ///
    /// Pattern: `im_delivery.v1.{domain}.{peer_type}.{subject}.message.created`
    /// where the recipient is classified as `bot` when its issuer mentions
    /// "bot" or "schema", otherwise `contact`.
    pub fn routing_key(&self) -> Option<String> {
        let EventPayload::MessageCreated(message) = &self.payload else {
            return None;
        };
        let issuer = message
            .to
            .issuer
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let peer_type = if issuer.contains("bot") || issuer.contains("schema") {
            "bot"
        } else {
            "contact"
        };
        Some(format!(
            "im_delivery.v1.{}.{}.{}.message.created",
            message.domain_id,
            peer_type,
            message.to.sub.as_deref().unwrap_or_default(),
        ))
    }
}

// Wall-clock milliseconds; the registry never needs sub-ms event timestamps.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
