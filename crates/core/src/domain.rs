//! Domain-service collaborator boundary.
//!
//! The engine never performs CRUD itself. Every action type is dispatched to
//! a registered [`ActionHandler`], and the concrete services (course, goal,
//! schedule, note storage) live behind this trait.

use crate::action::{ActionPayload, ActionType, EntityKind};
use crate::error::ErrorKind;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Failure modes a domain service may report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tier limit exceeded: {0}")]
    TierLimit(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Transient failures are eligible for retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::TierLimit(_) => ErrorKind::TierLimit,
            DomainError::Transient(_) => ErrorKind::Transient,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// The result of a successfully executed action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Entity this action established, used to update the user's active
    /// entity pointers (e.g. the id of a freshly created course).
    pub entity: Option<(EntityKind, String)>,
    /// Opaque payload returned to the client in the completion event.
    pub data: Value,
}

impl ActionOutcome {
    pub fn with_entity(kind: EntityKind, id: String, data: Value) -> Self {
        Self {
            entity: Some((kind, id)),
            data,
        }
    }

    pub fn data_only(data: Value) -> Self {
        Self { entity: None, data }
    }
}

/// A domain service capable of executing one action type.
///
/// `active` is a snapshot of the user's active entity pointers taken just
/// before dispatch, so a directive can resolve references like "the course we
/// just created" that an earlier directive in the same reply established.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        user_id: &str,
        payload: &ActionPayload,
        active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError>;
}

/// Dispatch table from action type to its domain service.
pub type HandlerRegistry = HashMap<ActionType, Arc<dyn ActionHandler>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(DomainError::Transient("timeout".into()).is_transient());
        assert!(!DomainError::Validation("bad title".into()).is_transient());
        assert!(!DomainError::NotFound("course".into()).is_transient());
        assert!(!DomainError::Internal("boom".into()).is_transient());
    }

    #[test]
    fn error_kind_mapping() {
        assert_eq!(
            DomainError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DomainError::Transient("x".into()).kind(),
            ErrorKind::Transient
        );
    }
}
