//! Transport-facing session lifecycle.
//!
//! The gRPC stream, WebSocket and long-poll handlers all attach sessions
//! through this service; none of them talk to the hub directly.
use herald_common::ids::{ConnId, UserId};
use herald_registry::{Connector, Hub};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Protocol version reported in the connected handshake event.
pub const SERVER_VERSION: &str = "v1";

#[derive(Clone)]
pub struct DeliveryService {
    hub: Arc<Hub>,
    session_buffer: usize,
}

impl DeliveryService {
    pub fn new(hub: Arc<Hub>) -> Self {
        // Session buffers match the cell mailbox capacity.
        let session_buffer = hub.config().mailbox_size;
        Self {
            hub,
            session_buffer,
        }
    }

    /// Create a session connector bound to `session` and attach it to the
    /// user's cell. The returned handle is what the transport drains.
    pub fn subscribe(&self, session: &CancellationToken, user_id: UserId) -> Arc<Connector> {
        let conn = Connector::new(session, user_id, self.session_buffer);
        self.hub.register(Arc::clone(&conn));
        tracing::debug!(user_id = %user_id, conn_id = %conn.id(), "session subscribed");
        conn
    }

    /// Detach and close one session. The user's cell stays warm until the
    /// evictor reclaims it.
    pub fn unsubscribe(&self, user_id: UserId, conn_id: ConnId) {
        self.hub.unregister(user_id, conn_id);
        tracing::debug!(user_id = %user_id, conn_id = %conn_id, "session unsubscribed");
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}
