//! Event Fan-out
//!
//! Publishes conversation and action events to every live session of one
//! user. Delivery is best-effort and at-most-once per session: a session
//! that died mid-publish is pruned by the registry and the remaining
//! sessions still receive the event. Clients that reconnect reconcile
//! through the context snapshot endpoint instead of a redelivery queue.

use super::protocol::ServerMessage;
use super::registry::SessionRegistry;
use std::sync::Arc;
use tracing::debug;

pub struct EventFanout {
    registry: Arc<SessionRegistry>,
}

impl EventFanout {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    /// Delivers the event to every live session of `user_id` and never to
    /// anyone else's.
    pub async fn publish(&self, user_id: &str, event: ServerMessage) {
        for session_id in self.registry.sessions_for(user_id).await {
            if let Err(e) = self.registry.send(session_id, event.clone()).await {
                debug!(%session_id, user_id, error = %e, "fan-out skipped dead session");
            }
        }
    }
}
