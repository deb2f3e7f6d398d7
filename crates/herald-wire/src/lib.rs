//! Transport frame envelope for the streaming transports.
//!
//! # Purpose
//! Every transport (gRPC stream, WebSocket, long-poll) writes the same JSON
//! envelope for an event. Since all sessions of one user receive the same
//! `Arc<Event>`, the envelope is encoded exactly once per event and reused
//! through the event's cache slot.
use bytes::Bytes;
use herald_registry::event::{Event, EventKind, EventPayload};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Tag written into the frame's `event` field.
pub fn kind_tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Connected => "connected",
        EventKind::MessageCreated => "message_created",
        EventKind::Disconnected => "disconnected",
    }
}

#[derive(Serialize)]
struct ServerFrame<'a> {
    id: &'a str,
    event: &'static str,
    priority: i32,
    created_at: i64,
    payload: &'a EventPayload,
}

/// Encode the event into its wire frame.
///
/// The first call per event does the serialization work and stores the
/// result in the event's cache slot; every later call (other sessions of
/// the same user, retries) returns the cached bytes without re-encoding.
pub fn encode_frame(ev: &Event) -> Result<Bytes> {
    if let Some(cached) = ev.cached_frame() {
        return Ok(cached);
    }
    let frame = ServerFrame {
        id: ev.id(),
        event: kind_tag(ev.kind()),
        priority: ev.priority().into(),
        created_at: ev.occurred_at(),
        payload: ev.payload(),
    };
    let encoded = Bytes::from(serde_json::to_vec(&frame)?);
    Ok(ev.store_frame(encoded))
}
