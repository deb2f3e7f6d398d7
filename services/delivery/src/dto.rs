//! Raw bus payloads and their mapping into the domain model.
use chrono::{DateTime, Utc};
use herald_common::model::{Document, Image, Message, Peer, PeerKind};
use serde::Deserialize;
use uuid::Uuid;

/// Inbound `message.created` payload as published by the thread service.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageV1 {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub domain_id: i64,
    #[serde(default)]
    pub from: PeerDto,
    #[serde(default)]
    pub to: PeerDto,
    #[serde(default)]
    pub body: String,
    /// RFC3339 timestamp.
    #[serde(default)]
    pub occurred_at: String,
    #[serde(default)]
    pub images: Vec<ImageDto>,
    #[serde(default)]
    pub documents: Vec<DocumentDto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerDto {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: i16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageDto {
    #[serde(default)]
    pub file_id: i64,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentDto {
    #[serde(default)]
    pub file_id: i64,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

impl PeerDto {
    pub fn to_domain(&self) -> Peer {
        Peer::new(parse_uuid_or_nil(&self.id), PeerKind::from_wire(self.kind))
    }
}

impl MessageV1 {
    /// Map the raw payload into the domain entity. Malformed UUIDs fall
    /// back to nil rather than failing the whole message.
    pub fn to_domain(&self) -> Message {
        Message {
            id: parse_uuid_or_nil(&self.message_id),
            thread_id: parse_uuid_or_nil(&self.thread_id),
            domain_id: self.domain_id,
            from: self.from.to_domain(),
            to: self.to.to_domain(),
            text: self.body.clone(),
            created_at: self.occurred_at_millis(),
            updated_at: 0,
            documents: self
                .documents
                .iter()
                .map(|doc| Document {
                    id: doc.file_id.to_string(),
                    url: None,
                    file_name: doc.name.clone(),
                    mime_type: doc.mime.clone(),
                    size: doc.size,
                })
                .collect(),
            images: self
                .images
                .iter()
                .map(|img| Image {
                    id: img.file_id.to_string(),
                    url: None,
                    file_name: img.name.clone(),
                    mime_type: img.mime.clone(),
                    thumbnails: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn occurred_at_millis(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.occurred_at)
            .map(|ts| ts.timestamp_millis())
            .unwrap_or_else(|_| Utc::now().timestamp_millis())
    }
}

fn parse_uuid_or_nil(raw: &str) -> Uuid {
    Uuid::parse_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_maps_into_the_domain() {
        let raw: MessageV1 = serde_json::from_str(
            r#"{
                "message_id": "6a4f4b66-7a87-4e20-90e1-a2e3226e077e",
                "thread_id": "0d4c6f0c-4a85-4c44-8b76-aabcaa3e6ecc",
                "domain_id": 7,
                "from": {"id": "8f5c1e96-d1fd-4b48-9f2f-0cb1e11b6a52", "type": 1},
                "to": {"id": "63b2de6f-4a92-41fb-9a63-3cf6a86fd6d9", "type": 1},
                "body": "hello",
                "occurred_at": "2024-05-02T10:30:00Z",
                "images": [{"file_id": 9, "mime": "image/png", "name": "pic.png"}],
                "documents": [{"file_id": 4, "mime": "application/pdf", "name": "a.pdf", "size": 2048}]
            }"#,
        )
        .expect("decode");

        let message = raw.to_domain();
        assert_eq!(message.domain_id, 7);
        assert_eq!(message.text, "hello");
        assert_eq!(message.from.kind, Some(PeerKind::User));
        assert_eq!(message.created_at, 1_714_645_800_000);
        assert_eq!(message.images[0].id, "9");
        assert_eq!(message.documents[0].size, 2048);
    }

    #[test]
    fn malformed_uuids_become_nil() {
        let raw: MessageV1 = serde_json::from_str(
            r#"{"message_id": "garbage", "from": {"id": "also-garbage", "type": 0}}"#,
        )
        .expect("decode");
        let message = raw.to_domain();
        assert!(message.id.is_nil());
        assert!(message.from.id.is_nil());
        assert_eq!(message.from.kind, None);
    }

    #[test]
    fn unparsable_timestamp_falls_back_to_now() {
        let raw: MessageV1 =
            serde_json::from_str(r#"{"occurred_at": "yesterday-ish"}"#).expect("decode");
        let before = Utc::now().timestamp_millis();
        let occurred = raw.occurred_at_millis();
        assert!(occurred >= before);
    }
}
