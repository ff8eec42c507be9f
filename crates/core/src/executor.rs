//! Action Router/Executor
//!
//! Dispatches validated directives to their domain services with
//! exactly-once-per-request semantics: execution records are keyed by
//! `action_id`, re-submission of a terminal id returns the existing record
//! without a second domain call, and concurrent submissions of the same id
//! collapse into a single in-flight call (single-flight).

use crate::action::{ActionDirective, ActionType};
use crate::context::ContextStore;
use crate::domain::{DomainError, HandlerRegistry};
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Bound on attempts for transient-classified failures.
const MAX_ATTEMPTS: u32 = 3;
/// Base delay between retry attempts, scaled linearly per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Default per-call budget, after which the call counts as transient.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Succeeded,
    Failed,
    /// Served from the idempotency cache: the directive had already reached a
    /// terminal state and no domain call was made.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// The durable trace of one directive's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutionRecord {
    pub action_id: Uuid,
    pub action_type: ActionType,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<ExecutionFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

enum RecordEntry {
    InFlight {
        action_type: ActionType,
        started_at: DateTime<Utc>,
        rx: watch::Receiver<Option<ActionExecutionRecord>>,
    },
    Done(ActionExecutionRecord),
}

pub struct ActionExecutor {
    handlers: HandlerRegistry,
    context: Arc<ContextStore>,
    records: Mutex<HashMap<Uuid, RecordEntry>>,
    call_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(handlers: HandlerRegistry, context: Arc<ContextStore>) -> Self {
        Self {
            handlers,
            context,
            records: Mutex::new(HashMap::new()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Executes every directive of one assistant reply in parser order.
    ///
    /// Sequential on purpose: a later directive must observe the active
    /// entities established by an earlier one in the same reply. Replies of
    /// other users run concurrently through their own calls.
    pub async fn execute_reply(
        &self,
        user_id: &str,
        directives: &[ActionDirective],
    ) -> Vec<ActionExecutionRecord> {
        let mut records = Vec::with_capacity(directives.len());
        for directive in directives {
            records.push(self.execute(user_id, directive).await);
        }
        records
    }

    /// Executes a single directive, applying idempotency and single-flight.
    pub async fn execute(
        &self,
        user_id: &str,
        directive: &ActionDirective,
    ) -> ActionExecutionRecord {
        let action_id = directive.action_id;
        let action_type = directive.payload.action_type();

        enum Claim {
            Replay(ActionExecutionRecord),
            Join(watch::Receiver<Option<ActionExecutionRecord>>),
            Run(watch::Sender<Option<ActionExecutionRecord>>),
        }

        let claim = {
            let mut records = self.records.lock().await;
            match records.get(&action_id) {
                Some(RecordEntry::Done(record)) => Claim::Replay(record.clone()),
                Some(RecordEntry::InFlight { rx, .. }) => Claim::Join(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    records.insert(
                        action_id,
                        RecordEntry::InFlight {
                            action_type,
                            started_at: Utc::now(),
                            rx,
                        },
                    );
                    Claim::Run(tx)
                }
            }
        };

        let tx = match claim {
            Claim::Replay(record) => {
                info!(%action_id, %action_type, "replayed directive served from record");
                let mut replay = record;
                replay.status = ExecutionStatus::Duplicate;
                return replay;
            }
            Claim::Join(rx) => {
                return self.await_in_flight(action_id, action_type, rx).await;
            }
            Claim::Run(tx) => tx,
        };

        let record = self.run_directive(user_id, directive).await;
        {
            let mut records = self.records.lock().await;
            records.insert(action_id, RecordEntry::Done(record.clone()));
        }
        // Wake any caller that collapsed onto this flight.
        let _ = tx.send(Some(record.clone()));
        record
    }

    /// Reads the current record for an action id, pending included.
    pub async fn record(&self, action_id: Uuid) -> Option<ActionExecutionRecord> {
        let records = self.records.lock().await;
        match records.get(&action_id)? {
            RecordEntry::Done(record) => Some(record.clone()),
            RecordEntry::InFlight {
                action_type,
                started_at,
                ..
            } => Some(ActionExecutionRecord {
                action_id,
                action_type: *action_type,
                status: ExecutionStatus::Pending,
                result: None,
                error: None,
                started_at: *started_at,
                finished_at: None,
            }),
        }
    }

    async fn await_in_flight(
        &self,
        action_id: Uuid,
        action_type: ActionType,
        mut rx: watch::Receiver<Option<ActionExecutionRecord>>,
    ) -> ActionExecutionRecord {
        loop {
            if let Some(record) = rx.borrow_and_update().clone() {
                return record;
            }
            if rx.changed().await.is_err() {
                // The executing task dropped the sender without publishing a
                // result; report the directive as failed rather than hanging.
                warn!(%action_id, "in-flight execution vanished without a result");
                return ActionExecutionRecord {
                    action_id,
                    action_type,
                    status: ExecutionStatus::Failed,
                    result: None,
                    error: Some(ExecutionFailure {
                        kind: ErrorKind::Internal,
                        message: "execution aborted before completion".to_string(),
                    }),
                    started_at: Utc::now(),
                    finished_at: Some(Utc::now()),
                };
            }
        }
    }

    async fn run_directive(
        &self,
        user_id: &str,
        directive: &ActionDirective,
    ) -> ActionExecutionRecord {
        let action_id = directive.action_id;
        let action_type = directive.payload.action_type();
        let started_at = Utc::now();

        let outcome = match self.handlers.get(&action_type) {
            Some(handler) => {
                let mut attempt = 1u32;
                loop {
                    let active = self.context.active_entities(user_id).await;
                    let call = handler.execute(user_id, &directive.payload, &active);
                    let result = match tokio::time::timeout(self.call_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(DomainError::Transient(format!(
                            "domain call exceeded {:?}",
                            self.call_timeout
                        ))),
                    };
                    match result {
                        Ok(outcome) => break Ok(outcome),
                        Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                            warn!(%action_id, %action_type, attempt, error = %e, "transient failure, retrying");
                            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                            attempt += 1;
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
            None => Err(DomainError::Internal(format!(
                "no handler registered for '{}'",
                action_type
            ))),
        };

        match outcome {
            Ok(outcome) => {
                if let Some((kind, entity_id)) = &outcome.entity {
                    self.context
                        .set_active_entity(user_id, *kind, entity_id.clone())
                        .await;
                }
                info!(%action_id, %action_type, user_id, "action succeeded");
                ActionExecutionRecord {
                    action_id,
                    action_type,
                    status: ExecutionStatus::Succeeded,
                    result: Some(outcome.data),
                    error: None,
                    started_at,
                    finished_at: Some(Utc::now()),
                }
            }
            Err(e) => {
                warn!(%action_id, %action_type, user_id, error = %e, "action failed");
                ActionExecutionRecord {
                    action_id,
                    action_type,
                    status: ExecutionStatus::Failed,
                    result: None,
                    error: Some(ExecutionFailure {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                    started_at,
                    finished_at: Some(Utc::now()),
                }
            }
        }
    }
}
