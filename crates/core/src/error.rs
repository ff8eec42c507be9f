//! Error classification shared across the engine.
//!
//! Terminal failures are surfaced to clients with a stable, human-readable
//! `error_kind` string rather than a raw error chain.

use serde::{Deserialize, Serialize};

/// Wire-visible classification of a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    TierLimit,
    Transient,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TierLimit => "tier_limit",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::TierLimit).unwrap(),
            "\"tier_limit\""
        );
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
