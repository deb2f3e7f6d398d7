//! Inbound bus binder: locality filtering, decoding and fan-out dispatch.
//!
//! # Contract with the broker adapter
//! `Ok(())` acknowledges the delivery; an error asks the broker layer to
//! retry or dead-letter it. Malformed deliveries are always acknowledged —
//! they will never decode better on a redelivery.
use super::dispatcher::EventDispatcher;
use super::InboundMessage;
use crate::dto::MessageV1;
use crate::enricher::PeerEnricher;
use anyhow::{Context, Result};
use herald_common::ids::UserId;
use herald_registry::event::Event;
use herald_registry::Hub;
use std::sync::Arc;

pub struct MessageBinder {
    hub: Arc<Hub>,
    enricher: Arc<PeerEnricher>,
    dispatcher: Arc<EventDispatcher>,
}

impl MessageBinder {
    pub fn new(
        hub: Arc<Hub>,
        enricher: Arc<PeerEnricher>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            hub,
            enricher,
            dispatcher,
        }
    }

    /// Handle one `message.created` delivery from the bus.
    pub async fn on_message_created(&self, msg: InboundMessage) -> Result<()> {
        let Some(user_id) = msg.target_user() else {
            metrics::counter!("herald_bind_total", "result" => "unroutable").increment(1);
            tracing::warn!(msg_id = %msg.id, "inbound delivery without routable recipient");
            return Ok(());
        };

        // Locality filter: the bus fans out to every node, only the node
        // hosting the target user handles the delivery.
        if !self.hub.is_connected(user_id) {
            metrics::counter!("herald_bind_total", "result" => "remote").increment(1);
            return Ok(());
        }

        let raw: MessageV1 = match serde_json::from_slice(&msg.payload) {
            Ok(raw) => raw,
            Err(err) => {
                // Poison-pill protection: acknowledge instead of nack-looping.
                metrics::counter!("herald_bind_total", "result" => "poison").increment(1);
                tracing::error!(msg_id = %msg.id, error = %err, "undecodable delivery acknowledged");
                return Ok(());
            }
        };

        // The domain handler runs in its own task so a panic is contained
        // and the consumer stays alive.
        let enricher = Arc::clone(&self.enricher);
        let handled =
            tokio::spawn(async move { build_message_event(enricher, user_id, raw).await }).await;
        let ev = match handled {
            Ok(Ok(ev)) => ev,
            // Business failure: surface to the broker for retry/DLX.
            Ok(Err(err)) => return Err(err),
            Err(join_err) => {
                metrics::counter!("herald_bind_total", "result" => "panic").increment(1);
                tracing::error!(msg_id = %msg.id, error = %join_err, "handler panicked; delivery acknowledged");
                return Ok(());
            }
        };
        let Some(ev) = ev else {
            return Ok(());
        };

        // Local fan-out first, then global re-publication.
        self.hub.broadcast(Arc::clone(&ev));
        if ev.routing_key().is_some() {
            self.dispatcher
                .publish(&ev)
                .await
                .context("re-publish enriched event")?;
        }
        metrics::counter!("herald_bind_total", "result" => "ok").increment(1);
        Ok(())
    }
}

async fn build_message_event(
    enricher: Arc<PeerEnricher>,
    user_id: UserId,
    raw: MessageV1,
) -> Result<Option<Arc<Event>>> {
    let (from, to) = enricher
        .resolve_peers(raw.from.to_domain(), raw.to.to_domain(), raw.domain_id)
        .await;
    let mut message = raw.to_domain();
    message.from = from;
    message.to = to;
    Ok(Some(Arc::new(Event::message_created(message, user_id))))
}
