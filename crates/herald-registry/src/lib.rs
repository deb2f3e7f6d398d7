//! Per-user delivery registry built on isolated user actors.
//!
//! # Purpose
//! - Every active user is represented by an isolated [`Cell`] that owns all
//!   of that user's concurrent transport sessions.
//! - Bounded per-user mailboxes decouple producers from slow consumers, so
//!   one stalled stream never drags down global throughput.
//! - Events are encoded once per user group through the per-event frame
//!   cache instead of once per session.
//! - All lookups go through independently locked shards; there is no global
//!   mutex anywhere on the hot path.
//!
//! ```
//! use herald_common::ids::UserId;
//! use herald_registry::event::Event;
//! use herald_registry::{Connector, Hub, HubConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let rt = tokio::runtime::Runtime::new().expect("rt");
//! rt.block_on(async {
//!     let hub = Hub::new(HubConfig::default());
//!     let user = UserId::new();
//!     let session = CancellationToken::new();
//!     let conn = Connector::new(&session, user, 16);
//!     hub.register(Arc::clone(&conn));
//!     let ev = Arc::new(Event::connected(user, conn.id(), "v1"));
//!     assert!(hub.broadcast(ev));
//!     let received = conn.recv().await.expect("event");
//!     assert_eq!(received.user_id(), user);
//!     hub.shutdown();
//! });
//! ```
pub mod cell;
pub mod connector;
pub mod event;
pub mod hub;

pub use cell::Cell;
pub use connector::Connector;
pub use event::{Event, EventKind, EventPayload, EventPriority};
pub use hub::{Hub, HubConfig, HubStats, ShardStats, SHARD_COUNT};
