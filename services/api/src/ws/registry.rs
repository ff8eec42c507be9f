//! Session Registry
//!
//! In-memory bookkeeping of live WebSocket connections: a multimap from user
//! id to sessions, an outbound channel per session, and a heartbeat sweeper
//! that prunes connections which stop answering pings. Nothing here is
//! persisted — on restart, reconnecting clients replay state through the
//! context snapshot endpoint, not through the registry.

use super::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interval between liveness pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Consecutive missed intervals after which a session is dropped.
pub const MISSED_HEARTBEAT_LIMIT: u32 = 3;
/// Outbound queue depth per session before events are shed.
const OUTBOUND_BUFFER: usize = 64;

/// Frames the per-session writer task can be asked to send.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerMessage),
    Ping,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("connection closed")]
    ConnectionClosed,
}

struct SessionEntry {
    user_id: String,
    tx: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
    last_heartbeat: Instant,
}

#[derive(Default)]
struct Inner {
    by_session: HashMap<Uuid, SessionEntry>,
    by_user: HashMap<String, HashSet<Uuid>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a channel for a new connection and returns its session id
    /// along with the receiving half for the connection's writer task.
    pub async fn register(&self, user_id: &str) -> (Uuid, mpsc::Receiver<Outbound>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut inner = self.inner.write().await;
        inner.by_session.insert(
            session_id,
            SessionEntry {
                user_id: user_id.to_string(),
                tx,
                connected_at: Utc::now(),
                last_heartbeat: Instant::now(),
            },
        );
        inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id);
        info!(%session_id, user_id, "session registered");
        (session_id, rx)
    }

    pub async fn unregister(&self, session_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.by_session.remove(&session_id) {
            if let Some(sessions) = inner.by_user.get_mut(&entry.user_id) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    inner.by_user.remove(&entry.user_id);
                }
            }
            info!(
                %session_id,
                user_id = %entry.user_id,
                connected_at = %entry.connected_at,
                "session unregistered"
            );
        }
    }

    pub async fn sessions_for(&self, user_id: &str) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Records liveness for a session; any inbound frame counts.
    pub async fn touch(&self, session_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.by_session.get_mut(&session_id) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Queues an event for one session. A closed transport unregisters the
    /// session here rather than surfacing the failure to every caller; a
    /// full queue sheds the event (delivery is best-effort).
    pub async fn send(&self, session_id: Uuid, event: ServerMessage) -> Result<(), RegistryError> {
        let tx = {
            let inner = self.inner.read().await;
            inner
                .by_session
                .get(&session_id)
                .map(|entry| entry.tx.clone())
                .ok_or(RegistryError::SessionNotFound(session_id))?
        };
        match tx.try_send(Outbound::Event(event)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%session_id, "outbound queue full, event dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(session_id).await;
                Err(RegistryError::ConnectionClosed)
            }
        }
    }

    /// Starts the background sweeper: pings every live session at the given
    /// interval and unregisters those that missed too many in a row.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        missed_limit: u32,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let deadline = interval * missed_limit;
                let mut stale = Vec::new();
                let mut live = Vec::new();
                {
                    let inner = registry.inner.read().await;
                    for (id, entry) in &inner.by_session {
                        if entry.last_heartbeat.elapsed() > deadline {
                            stale.push(*id);
                        } else {
                            live.push((*id, entry.tx.clone()));
                        }
                    }
                }
                for id in stale {
                    debug!(session_id = %id, "heartbeat expired");
                    registry.unregister(id).await;
                }
                for (id, tx) in live {
                    if tx.try_send(Outbound::Ping).is_err()
                        && tx.is_closed()
                    {
                        registry.unregister(id).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = registry.register("alice").await;
        let (b, _rx_b) = registry.register("alice").await;
        let (c, _rx_c) = registry.register("bob").await;

        let mut alice = registry.sessions_for("alice").await;
        alice.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(alice, expected);
        assert_eq!(registry.sessions_for("bob").await, vec![c]);

        registry.unregister(a).await;
        assert_eq!(registry.sessions_for("alice").await, vec![b]);
    }

    #[tokio::test]
    async fn send_reaches_the_writer_channel() {
        let registry = SessionRegistry::new();
        let (id, mut rx) = registry.register("alice").await;
        registry
            .send(id, ServerMessage::QuotaWarning { remaining: 1 })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Outbound::Event(ServerMessage::QuotaWarning { remaining }) => {
                assert_eq!(remaining, 1)
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_to_dead_connection_self_heals() {
        let registry = SessionRegistry::new();
        let (id, rx) = registry.register("alice").await;
        drop(rx);

        let err = registry
            .send(id, ServerMessage::QuotaWarning { remaining: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConnectionClosed));
        assert!(registry.sessions_for("alice").await.is_empty());
    }

    #[tokio::test]
    async fn send_to_unknown_session_errors() {
        let registry = SessionRegistry::new();
        let err = registry
            .send(Uuid::new_v4(), ServerMessage::QuotaWarning { remaining: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn heartbeat_expires_silent_sessions() {
        let registry = SessionRegistry::new();
        let (quiet, mut quiet_rx) = registry.register("alice").await;
        let (chatty, mut chatty_rx) = registry.register("alice").await;
        let sweeper = registry.spawn_heartbeat(Duration::from_millis(20), 2);

        // Keep one session alive by answering pings, starve the other.
        let keepalive = {
            let registry = registry.clone();
            tokio::spawn(async move {
                while let Some(frame) = chatty_rx.recv().await {
                    if matches!(frame, Outbound::Ping) {
                        registry.touch(chatty).await;
                    }
                }
            })
        };
        // Drain the quiet session's queue without touching.
        let drain = tokio::spawn(async move { while quiet_rx.recv().await.is_some() {} });

        tokio::time::sleep(Duration::from_millis(150)).await;
        let live = registry.sessions_for("alice").await;
        assert_eq!(live, vec![chatty]);
        assert!(!live.contains(&quiet));

        sweeper.abort();
        keepalive.abort();
        drain.abort();
    }
}
