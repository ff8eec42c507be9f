//! Conversation Context Store
//!
//! Holds each user's rolling message history and "active entity" pointers
//! (e.g. the course the last directive created). State is kept in a sharded
//! map keyed by user id: each shard carries its own lock, so one user's
//! updates serialize while unrelated users proceed independently.

use crate::action::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque, hash_map::DefaultHasher};
use std::hash::{Hash, Hasher};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Number of independently lockable shards. Power of two so the hash maps
/// onto a shard with a mask.
const SHARD_COUNT: usize = 16;

/// How many turns of history are retained per user.
pub const MAX_RECENT_TURNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One immutable entry in a user's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Ids of the action directives extracted from this turn, if any.
    #[serde(default)]
    pub action_refs: Vec<Uuid>,
}

impl ConversationTurn {
    pub fn new(user_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            user_id: user_id.into(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            action_refs: Vec::new(),
        }
    }

    pub fn with_action_refs(mut self, refs: Vec<Uuid>) -> Self {
        self.action_refs = refs;
        self
    }
}

/// The bounded view of a user's conversation handed to the LLM and to
/// reconnecting clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub user_id: String,
    pub recent_turns: VecDeque<ConversationTurn>,
    pub active_entities: HashMap<EntityKind, String>,
}

impl ConversationContext {
    fn new(user_id: String) -> Self {
        Self {
            user_id,
            recent_turns: VecDeque::with_capacity(MAX_RECENT_TURNS),
            active_entities: HashMap::new(),
        }
    }
}

/// Sharded, in-memory store of per-user conversation state.
pub struct ContextStore {
    shards: Vec<Mutex<HashMap<String, ConversationContext>>>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, user_id: &str) -> &Mutex<HashMap<String, ConversationContext>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (SHARD_COUNT - 1)]
    }

    /// Appends a turn to the user's history, evicting the oldest entry once
    /// the ring is full, and returns the updated bounded view.
    pub async fn append_turn(&self, turn: ConversationTurn) -> ConversationContext {
        let mut shard = self.shard(&turn.user_id).lock().await;
        let ctx = shard
            .entry(turn.user_id.clone())
            .or_insert_with(|| ConversationContext::new(turn.user_id.clone()));
        if ctx.recent_turns.len() == MAX_RECENT_TURNS {
            ctx.recent_turns.pop_front();
        }
        ctx.recent_turns.push_back(turn);
        ctx.clone()
    }

    /// Returns the current bounded view for a user. Users with no history yet
    /// get an empty context rather than an error.
    pub async fn context(&self, user_id: &str) -> ConversationContext {
        let shard = self.shard(user_id).lock().await;
        shard
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| ConversationContext::new(user_id.to_string()))
    }

    /// Upserts the active entity pointer of the given kind.
    pub async fn set_active_entity(&self, user_id: &str, kind: EntityKind, entity_id: String) {
        let mut shard = self.shard(user_id).lock().await;
        let ctx = shard
            .entry(user_id.to_string())
            .or_insert_with(|| ConversationContext::new(user_id.to_string()));
        ctx.active_entities.insert(kind, entity_id);
    }

    /// Snapshot of the user's active entity pointers.
    pub async fn active_entities(&self, user_id: &str) -> HashMap<EntityKind, String> {
        let shard = self.shard(user_id).lock().await;
        shard
            .get(user_id)
            .map(|ctx| ctx.active_entities.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_returns_updated_view() {
        let store = ContextStore::new();
        let ctx = store
            .append_turn(ConversationTurn::new("alice", Role::User, "hello"))
            .await;
        assert_eq!(ctx.recent_turns.len(), 1);
        assert_eq!(ctx.recent_turns[0].text, "hello");
    }

    #[tokio::test]
    async fn history_is_bounded_and_evicts_oldest() {
        let store = ContextStore::new();
        for i in 0..MAX_RECENT_TURNS + 5 {
            store
                .append_turn(ConversationTurn::new(
                    "alice",
                    Role::User,
                    format!("msg {}", i),
                ))
                .await;
        }
        let ctx = store.context("alice").await;
        assert_eq!(ctx.recent_turns.len(), MAX_RECENT_TURNS);
        assert_eq!(ctx.recent_turns.front().unwrap().text, "msg 5");
        assert_eq!(
            ctx.recent_turns.back().unwrap().text,
            format!("msg {}", MAX_RECENT_TURNS + 4)
        );
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = ContextStore::new();
        store
            .append_turn(ConversationTurn::new("alice", Role::User, "from alice"))
            .await;
        store
            .append_turn(ConversationTurn::new("bob", Role::User, "from bob"))
            .await;

        let alice = store.context("alice").await;
        let bob = store.context("bob").await;
        assert_eq!(alice.recent_turns.len(), 1);
        assert_eq!(bob.recent_turns.len(), 1);
        assert_eq!(alice.recent_turns[0].text, "from alice");
        assert_eq!(bob.recent_turns[0].text, "from bob");
    }

    #[tokio::test]
    async fn active_entities_upsert() {
        let store = ContextStore::new();
        store
            .set_active_entity("alice", EntityKind::Course, "course-1".into())
            .await;
        store
            .set_active_entity("alice", EntityKind::Course, "course-2".into())
            .await;
        let active = store.active_entities("alice").await;
        assert_eq!(active.get(&EntityKind::Course).unwrap(), "course-2");
    }

    #[tokio::test]
    async fn concurrent_appends_for_one_user_all_land() {
        let store = std::sync::Arc::new(ContextStore::new());
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_turn(ConversationTurn::new("alice", Role::User, format!("{}", i)))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let ctx = store.context("alice").await;
        assert_eq!(ctx.recent_turns.len(), 10);
    }
}
