//! Outbound re-publication of enriched events.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use herald_registry::event::{Event, EventPayload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier stamped into outbound envelopes.
const SOURCE: &str = "herald-delivery";

/// Transport-agnostic bus publisher provided by the broker adapter.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}

// Envelope consumed by downstream subscribers of re-published events.
#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    id: &'a str,
    source: &'static str,
    user_id: Uuid,
    kind: i16,
    payload: &'a EventPayload,
    timestamp: i64,
}

pub struct EventDispatcher {
    publisher: Arc<dyn Publisher>,
    timeout: Duration,
}

impl EventDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    /// Publish an exportable event back to the bus; local-only events are
    /// a no-op. Failures propagate so the broker layer can retry.
    pub async fn publish(&self, ev: &Event) -> Result<()> {
        let Some(topic) = ev.routing_key() else {
            return Ok(());
        };
        let envelope = OutboundEnvelope {
            id: ev.id(),
            source: SOURCE,
            user_id: ev.user_id().as_uuid(),
            kind: ev.kind().into(),
            payload: ev.payload(),
            timestamp: ev.occurred_at(),
        };
        let encoded =
            Bytes::from(serde_json::to_vec(&envelope).context("encode outbound envelope")?);
        let outcome = tokio::time::timeout(self.timeout, self.publisher.publish(&topic, encoded))
            .await
            .map_err(|_| anyhow!("publish to {topic} timed out"))?;
        outcome.with_context(|| format!("publish to {topic}"))?;
        metrics::counter!("herald_outbound_published_total").increment(1);
        tracing::debug!(topic = %topic, event_id = %ev.id(), "event re-published");
        Ok(())
    }
}
