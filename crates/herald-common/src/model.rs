//! Conversation domain model shared by the registry, the wire layer and the
//! service crate.
//!
//! # Purpose
//! Holds the entities that travel inside events: the participants (`Peer`),
//! the message body with its attachments, and the system payloads emitted
//! around a session's lifetime.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Participant classification.
///
/// Wire value zero is reserved for "uninitialized"; an absent or unknown
/// classification is represented as `None` on [`Peer::kind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum PeerKind {
    User = 1,
    Bot = 2,
    Chat = 3,
    Channel = 4,
}

impl PeerKind {
    // Lenient mapping for bus payloads: zero/unknown values become None.
    pub fn from_wire(value: i16) -> Option<Self> {
        Self::try_from(value).ok()
    }
}

impl From<PeerKind> for i16 {
    fn from(kind: PeerKind) -> Self {
        kind as i16
    }
}

impl TryFrom<i16> for PeerKind {
    type Error = crate::Error;

    fn try_from(value: i16) -> crate::Result<Self> {
        match value {
            1 => Ok(Self::User),
            2 => Ok(Self::Bot),
            3 => Ok(Self::Chat),
            4 => Ok(Self::Channel),
            other => Err(crate::Error::InvalidPeerKind(other)),
        }
    }
}

/// A conversation participant, optionally enriched with display identity.
///
/// A nil `id` marks an absent participant and is passed through untouched
/// by the enrichment layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: Uuid,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PeerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl Peer {
    pub fn new(id: Uuid, kind: Option<PeerKind>) -> Self {
        Self {
            id,
            kind,
            ..Self::default()
        }
    }
}

/// Core conversation entity delivered to clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub domain_id: i64,
    pub from: Peer,
    pub to: Peer,
    pub text: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thumbnails: Vec<String>,
}

/// Data sent to the client upon successful session establishment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub ok: bool,
    pub connection_id: String,
    pub server_version: String,
}

/// Notification sent just before the server closes a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedPayload {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Disconnect codes understood by clients.
pub mod disconnect_code {
    pub const SHUTDOWN: &str = "SHUTDOWN";
    pub const EVICTED: &str = "EVICTED";
    pub const TIMEOUT: &str = "TIMEOUT";
}
