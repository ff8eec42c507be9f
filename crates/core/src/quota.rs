//! Quota Gate
//!
//! Decides whether an inbound message may proceed to the completion provider.
//! The gate runs before any model call: a rejected message consumes neither a
//! completion nor an increment of the usage counter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Subscription tier of the sending user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QuotaError {
    #[error("monthly message limit of {limit} reached")]
    Exceeded { limit: u32 },
    #[error("usage store failure: {0}")]
    Store(String),
}

/// Outcome of an allowed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Messages left in the period after this one; `None` means unlimited.
    pub remaining: Option<u32>,
}

/// Usage/tier collaborator: a counter per (user, period).
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage(&self, user_id: &str, period: &str) -> anyhow::Result<u32>;
    async fn increment(&self, user_id: &str, period: &str) -> anyhow::Result<()>;
}

/// The current accounting period, keyed by year and month.
pub fn current_period() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

pub struct QuotaGate {
    store: Arc<dyn UsageStore>,
    free_limit: u32,
    /// Per-user critical sections keeping read-compare-increment atomic over
    /// the two-method collaborator interface.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn UsageStore>, free_limit: u32) -> Self {
        Self {
            store,
            free_limit,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Allows the message and counts it, or rejects it without counting.
    pub async fn check_and_increment(
        &self,
        user_id: &str,
        tier: Tier,
    ) -> Result<QuotaDecision, QuotaError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let period = current_period();
        let used = self
            .store
            .usage(user_id, &period)
            .await
            .map_err(|e| QuotaError::Store(e.to_string()))?;

        let remaining = match tier {
            Tier::Premium => None,
            Tier::Free => {
                if used >= self.free_limit {
                    return Err(QuotaError::Exceeded {
                        limit: self.free_limit,
                    });
                }
                Some(self.free_limit - used - 1)
            }
        };

        self.store
            .increment(user_id, &period)
            .await
            .map_err(|e| QuotaError::Store(e.to_string()))?;

        Ok(QuotaDecision { remaining })
    }
}

/// An in-memory `UsageStore` for development and testing.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counters: Mutex<HashMap<(String, String), u32>>,
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn usage(&self, user_id: &str, period: &str) -> anyhow::Result<u32> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(&(user_id.to_string(), period.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn increment(&self, user_id: &str, period: &str) -> anyhow::Result<()> {
        let mut counters = self.counters.lock().await;
        *counters
            .entry((user_id.to_string(), period.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }
}
