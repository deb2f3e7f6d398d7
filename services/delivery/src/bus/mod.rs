//! Bus-facing pipeline: the inbound binder and the outbound dispatcher.
//!
//! The broker adapter delivers opaque messages with a metadata dictionary;
//! everything routing-related is derived from the dotted routing key
//! carried in that metadata.
pub mod binder;
pub mod dispatcher;

use bytes::Bytes;
use herald_common::ids::UserId;
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key upstream publishers set for the original routing key.
pub const META_ROUTING_KEY: &str = "x-routing-key";
/// Fallback metadata key some producers use instead.
pub const META_ROUTING_KEY_FALLBACK: &str = "routing_key";

/// One broker delivery as handed over by the bus adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub metadata: HashMap<String, String>,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn routing_key(&self) -> Option<&str> {
        self.metadata
            .get(META_ROUTING_KEY)
            .or_else(|| self.metadata.get(META_ROUTING_KEY_FALLBACK))
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }

    /// The physical recipient: the first token of the dotted routing key
    /// that parses as a UUID.
    pub fn target_user(&self) -> Option<UserId> {
        self.routing_key()?
            .split('.')
            .find_map(|part| Uuid::parse_str(part).ok())
            .map(UserId::from_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_key(key: &str, value: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            metadata: HashMap::from([(key.to_string(), value.to_string())]),
            payload: Bytes::new(),
        }
    }

    #[test]
    fn target_is_the_first_uuid_token() {
        let msg = message_with_key(
            META_ROUTING_KEY,
            "im_message.11111111-1111-1111-1111-111111111111.message.created.v1",
        );
        assert_eq!(
            msg.target_user().expect("target").to_string(),
            "11111111-1111-1111-1111-111111111111"
        );
    }

    #[test]
    fn fallback_metadata_key_is_honored() {
        let msg = message_with_key(
            META_ROUTING_KEY_FALLBACK,
            "x.22222222-2222-2222-2222-222222222222.x",
        );
        assert!(msg.target_user().is_some());
    }

    #[test]
    fn missing_or_malformed_keys_have_no_target() {
        assert!(message_with_key(META_ROUTING_KEY, "").target_user().is_none());
        assert!(message_with_key(META_ROUTING_KEY, "a.b.c").target_user().is_none());
        let no_metadata = InboundMessage {
            id: "m2".into(),
            metadata: HashMap::new(),
            payload: Bytes::new(),
        };
        assert!(no_metadata.target_user().is_none());
    }
}
