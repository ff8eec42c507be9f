//! Action Directives
//!
//! This module defines the structured instructions the assistant can emit
//! alongside its natural-language replies. Each directive carries a typed,
//! schema-validated payload and an idempotency key that makes re-submission
//! of the same directive safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of side-effecting operations the assistant can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateCourse,
    CreateGoal,
    CreateSchedule,
    RecommendResources,
    SummarizeNotes,
    ProgressCheck,
    ReminderSet,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::CreateCourse => "create_course",
            ActionType::CreateGoal => "create_goal",
            ActionType::CreateSchedule => "create_schedule",
            ActionType::RecommendResources => "recommend_resources",
            ActionType::SummarizeNotes => "summarize_notes",
            ActionType::ProgressCheck => "progress_check",
            ActionType::ReminderSet => "reminder_set",
        };
        write!(f, "{}", s)
    }
}

/// The entity categories a successful action can leave behind as the user's
/// "active" object of that kind (e.g. the course a follow-up goal refers to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Goal,
    Schedule,
    Reminder,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Course => "course",
            EntityKind::Goal => "goal",
            EntityKind::Schedule => "schedule",
            EntityKind::Reminder => "reminder",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCoursePayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGoalPayload {
    pub title: String,
    /// Explicit course to attach the goal to. When absent, the handler falls
    /// back to the user's active course.
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub target_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchedulePayload {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendResourcesPayload {
    pub topic: String,
    #[serde(default = "default_resource_count")]
    pub count: u8,
}

fn default_resource_count() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeNotesPayload {
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub note_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCheckPayload {
    #[serde(default)]
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSetPayload {
    pub message: String,
    pub remind_at: DateTime<Utc>,
}

/// A typed action payload, one variant per [`ActionType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    CreateCourse(CreateCoursePayload),
    CreateGoal(CreateGoalPayload),
    CreateSchedule(CreateSchedulePayload),
    RecommendResources(RecommendResourcesPayload),
    SummarizeNotes(SummarizeNotesPayload),
    ProgressCheck(ProgressCheckPayload),
    ReminderSet(ReminderSetPayload),
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionPayload::CreateCourse(_) => ActionType::CreateCourse,
            ActionPayload::CreateGoal(_) => ActionType::CreateGoal,
            ActionPayload::CreateSchedule(_) => ActionType::CreateSchedule,
            ActionPayload::RecommendResources(_) => ActionType::RecommendResources,
            ActionPayload::SummarizeNotes(_) => ActionType::SummarizeNotes,
            ActionPayload::ProgressCheck(_) => ActionType::ProgressCheck,
            ActionPayload::ReminderSet(_) => ActionType::ReminderSet,
        }
    }

    /// The entity category this action establishes as "active" on success.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self.action_type() {
            ActionType::CreateCourse => Some(EntityKind::Course),
            ActionType::CreateGoal => Some(EntityKind::Goal),
            ActionType::CreateSchedule => Some(EntityKind::Schedule),
            ActionType::ReminderSet => Some(EntityKind::Reminder),
            _ => None,
        }
    }
}

/// A validated instruction extracted from one assistant reply.
///
/// `action_id` is the idempotency key: submitting the same directive twice
/// must not produce a second side effect. `source_turn_id` links back to the
/// conversation turn the directive was parsed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDirective {
    pub action_id: Uuid,
    pub source_turn_id: Uuid,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_round_trips_as_snake_case() {
        let json = serde_json::to_string(&ActionType::CreateCourse).unwrap();
        assert_eq!(json, "\"create_course\"");
        let back: ActionType = serde_json::from_str("\"reminder_set\"").unwrap();
        assert_eq!(back, ActionType::ReminderSet);
    }

    #[test]
    fn payload_deserializes_from_tagged_form() {
        let json = r#"{"type":"create_course","payload":{"title":"Thermodynamics"}}"#;
        let payload: ActionPayload = serde_json::from_str(json).unwrap();
        match &payload {
            ActionPayload::CreateCourse(p) => assert_eq!(p.title, "Thermodynamics"),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(payload.action_type(), ActionType::CreateCourse);
        assert_eq!(payload.entity_kind(), Some(EntityKind::Course));
    }

    #[test]
    fn payload_rejects_missing_required_fields() {
        let json = r#"{"type":"reminder_set","payload":{"message":"study"}}"#;
        let result: Result<ActionPayload, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn resource_count_defaults_when_absent() {
        let json = r#"{"type":"recommend_resources","payload":{"topic":"entropy"}}"#;
        let payload: ActionPayload = serde_json::from_str(json).unwrap();
        match payload {
            ActionPayload::RecommendResources(p) => assert_eq!(p.count, 3),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn analysis_actions_set_no_active_entity() {
        let json = r#"{"type":"progress_check","payload":{}}"#;
        let payload: ActionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.entity_kind(), None);
    }
}
