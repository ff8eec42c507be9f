//! REST API Models
//!
//! DTOs for the HTTP surface, kept separate from the engine's own types so
//! the OpenAPI document (via `utoipa`) stays independent of core internals.

use chrono::{DateTime, Utc};
use mentor_core::context::{ConversationContext, ConversationTurn, Role};
use mentor_core::executor::ActionExecutionRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TurnDto {
    #[schema(value_type = String, format = Uuid)]
    pub turn_id: Uuid,
    #[schema(example = "user")]
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Vec<String>)]
    pub action_refs: Vec<Uuid>,
}

impl From<&ConversationTurn> for TurnDto {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        Self {
            turn_id: turn.turn_id,
            role: role.to_string(),
            text: turn.text.clone(),
            created_at: turn.created_at,
            action_refs: turn.action_refs.clone(),
        }
    }
}

/// Bounded view of a user's conversation, served to reconnecting clients.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ContextSnapshot {
    pub user_id: String,
    pub recent_turns: Vec<TurnDto>,
    #[schema(value_type = HashMap<String, String>)]
    pub active_entities: HashMap<String, String>,
}

impl From<&ConversationContext> for ContextSnapshot {
    fn from(ctx: &ConversationContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            recent_turns: ctx.recent_turns.iter().map(TurnDto::from).collect(),
            active_entities: ctx
                .active_entities
                .iter()
                .map(|(kind, id)| (kind.to_string(), id.clone()))
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ExecutionRecordDto {
    #[schema(value_type = String, format = Uuid)]
    pub action_id: Uuid,
    #[schema(example = "create_course")]
    pub action_type: String,
    #[schema(example = "succeeded")]
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ActionExecutionRecord> for ExecutionRecordDto {
    fn from(record: &ActionExecutionRecord) -> Self {
        Self {
            action_id: record.action_id,
            action_type: record.action_type.to_string(),
            status: serde_json::to_value(record.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string()),
            result: record.result.clone(),
            error_kind: record.error.as_ref().map(|e| e.kind.to_string()),
            error_message: record.error.as_ref().map(|e| e.message.clone()),
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::action::EntityKind;
    use mentor_core::context::ContextStore;
    use mentor_core::executor::ExecutionStatus;

    #[tokio::test]
    async fn context_snapshot_maps_roles_and_entities() {
        let store = ContextStore::new();
        store
            .append_turn(ConversationTurn::new("alice", Role::User, "hi"))
            .await;
        store
            .set_active_entity("alice", EntityKind::Course, "course-1".into())
            .await;

        let snapshot = ContextSnapshot::from(&store.context("alice").await);
        assert_eq!(snapshot.user_id, "alice");
        assert_eq!(snapshot.recent_turns.len(), 1);
        assert_eq!(snapshot.recent_turns[0].role, "user");
        assert_eq!(snapshot.active_entities.get("course").unwrap(), "course-1");
    }

    #[test]
    fn execution_record_dto_flattens_error() {
        let record = ActionExecutionRecord {
            action_id: Uuid::new_v4(),
            action_type: mentor_core::action::ActionType::CreateGoal,
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(mentor_core::executor::ExecutionFailure {
                kind: mentor_core::error::ErrorKind::Validation,
                message: "no course to attach goal to".into(),
            }),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };

        let dto = ExecutionRecordDto::from(&record);
        assert_eq!(dto.action_type, "create_goal");
        assert_eq!(dto.status, "failed");
        assert_eq!(dto.error_kind.as_deref(), Some("validation"));
        assert!(dto.result.is_none());
    }

    #[test]
    fn error_response_serialization() {
        let error = ErrorResponse {
            message: "Action not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Action not found"}"#);
    }
}
