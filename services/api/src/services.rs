//! In-memory domain services.
//!
//! The engine dispatches directives to collaborators behind the
//! `ActionHandler` trait; these implementations keep their entities in
//! process memory. They are the development/self-contained deployment
//! backing — a persistent deployment swaps them out without touching the
//! engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::action::{ActionPayload, ActionType, EntityKind};
use mentor_core::domain::{ActionHandler, ActionOutcome, DomainError, HandlerRegistry};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub course_id: String,
    pub target_date: Option<DateTime<Utc>>,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleBlock {
    pub id: String,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: String,
    pub message: String,
    pub remind_at: DateTime<Utc>,
}

/// Shared in-memory entity storage behind the per-action handlers.
#[derive(Default)]
pub struct StudyStore {
    courses: Mutex<HashMap<String, Course>>,
    goals: Mutex<HashMap<String, Goal>>,
    schedules: Mutex<HashMap<String, ScheduleBlock>>,
    reminders: Mutex<HashMap<String, Reminder>>,
}

impl StudyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn course_exists(&self, id: &str) -> bool {
        self.courses.lock().await.contains_key(id)
    }

    /// Resolves the course a directive refers to: an explicit id wins, then
    /// the user's active course pointer.
    async fn resolve_course(
        &self,
        explicit: Option<&String>,
        active: &HashMap<EntityKind, String>,
    ) -> Result<String, DomainError> {
        if let Some(id) = explicit {
            if !self.course_exists(id).await {
                return Err(DomainError::NotFound(format!("course '{}'", id)));
            }
            return Ok(id.clone());
        }
        match active.get(&EntityKind::Course) {
            Some(id) => Ok(id.clone()),
            None => Err(DomainError::Validation(
                "no course specified and no active course in this conversation".to_string(),
            )),
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

struct CreateCourseHandler {
    store: Arc<StudyStore>,
}

#[async_trait]
impl ActionHandler for CreateCourseHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        _active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::CreateCourse(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        if p.title.trim().is_empty() {
            return Err(DomainError::Validation("course title must not be empty".into()));
        }
        let course = Course {
            id: new_id("crs"),
            title: p.title.trim().to_string(),
            subject: p.subject.clone(),
            description: p.description.clone(),
            created_at: Utc::now(),
        };
        let data = serde_json::to_value(&course)
            .map_err(|e| DomainError::Internal(e.to_string()))?;
        let id = course.id.clone();
        self.store.courses.lock().await.insert(id.clone(), course);
        Ok(ActionOutcome::with_entity(EntityKind::Course, id, data))
    }
}

struct CreateGoalHandler {
    store: Arc<StudyStore>,
}

#[async_trait]
impl ActionHandler for CreateGoalHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::CreateGoal(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        if p.title.trim().is_empty() {
            return Err(DomainError::Validation("goal title must not be empty".into()));
        }
        let course_id = self
            .store
            .resolve_course(p.course_id.as_ref(), active)
            .await?;
        let goal = Goal {
            id: new_id("goal"),
            title: p.title.trim().to_string(),
            course_id,
            target_date: p.target_date,
            completed: false,
        };
        let data = serde_json::to_value(&goal).map_err(|e| DomainError::Internal(e.to_string()))?;
        let id = goal.id.clone();
        self.store.goals.lock().await.insert(id.clone(), goal);
        Ok(ActionOutcome::with_entity(EntityKind::Goal, id, data))
    }
}

struct CreateScheduleHandler {
    store: Arc<StudyStore>,
}

#[async_trait]
impl ActionHandler for CreateScheduleHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::CreateSchedule(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        if p.duration_minutes == 0 {
            return Err(DomainError::Validation(
                "schedule block duration must be positive".into(),
            ));
        }
        // Attaching to a course is optional for schedule blocks; only an
        // explicit unknown id is an error.
        let course_id = match &p.course_id {
            Some(id) => Some(
                self.store
                    .resolve_course(Some(id), active)
                    .await?,
            ),
            None => active.get(&EntityKind::Course).cloned(),
        };
        let block = ScheduleBlock {
            id: new_id("sch"),
            title: p.title.clone(),
            starts_at: p.starts_at,
            duration_minutes: p.duration_minutes,
            course_id,
        };
        let data =
            serde_json::to_value(&block).map_err(|e| DomainError::Internal(e.to_string()))?;
        let id = block.id.clone();
        self.store.schedules.lock().await.insert(id.clone(), block);
        Ok(ActionOutcome::with_entity(EntityKind::Schedule, id, data))
    }
}

struct RecommendResourcesHandler;

#[async_trait]
impl ActionHandler for RecommendResourcesHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        _active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::RecommendResources(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        if p.topic.trim().is_empty() {
            return Err(DomainError::Validation("topic must not be empty".into()));
        }
        let resources: Vec<_> = (1..=p.count.max(1))
            .map(|i| {
                json!({
                    "title": format!("{} — study resource {}", p.topic, i),
                    "kind": if i % 2 == 0 { "video" } else { "article" },
                })
            })
            .collect();
        Ok(ActionOutcome::data_only(
            json!({"topic": p.topic, "resources": resources}),
        ))
    }
}

struct SummarizeNotesHandler;

#[async_trait]
impl ActionHandler for SummarizeNotesHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        _active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::SummarizeNotes(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        Ok(ActionOutcome::data_only(json!({
            "note_count": p.note_ids.len(),
            "course_id": p.course_id,
            "summary": format!("Summary across {} note(s).", p.note_ids.len()),
        })))
    }
}

struct ProgressCheckHandler {
    store: Arc<StudyStore>,
}

#[async_trait]
impl ActionHandler for ProgressCheckHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::ProgressCheck(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        let course_id = self
            .store
            .resolve_course(p.course_id.as_ref(), active)
            .await?;
        let goals = self.store.goals.lock().await;
        let for_course: Vec<_> = goals
            .values()
            .filter(|g| g.course_id == course_id)
            .collect();
        let completed = for_course.iter().filter(|g| g.completed).count();
        Ok(ActionOutcome::data_only(json!({
            "course_id": course_id,
            "total_goals": for_course.len(),
            "completed_goals": completed,
        })))
    }
}

struct ReminderSetHandler {
    store: Arc<StudyStore>,
}

#[async_trait]
impl ActionHandler for ReminderSetHandler {
    async fn execute(
        &self,
        _user_id: &str,
        payload: &ActionPayload,
        _active: &HashMap<EntityKind, String>,
    ) -> Result<ActionOutcome, DomainError> {
        let ActionPayload::ReminderSet(p) = payload else {
            return Err(DomainError::Internal("payload/handler mismatch".into()));
        };
        if p.remind_at <= Utc::now() {
            return Err(DomainError::Validation(
                "reminder time must be in the future".into(),
            ));
        }
        let reminder = Reminder {
            id: new_id("rem"),
            message: p.message.clone(),
            remind_at: p.remind_at,
        };
        let data =
            serde_json::to_value(&reminder).map_err(|e| DomainError::Internal(e.to_string()))?;
        let id = reminder.id.clone();
        self.store.reminders.lock().await.insert(id.clone(), reminder);
        Ok(ActionOutcome::with_entity(EntityKind::Reminder, id, data))
    }
}

/// Builds the full dispatch table over one shared store.
pub fn handler_registry(store: Arc<StudyStore>) -> HandlerRegistry {
    let mut handlers: HandlerRegistry = HashMap::new();
    handlers.insert(
        ActionType::CreateCourse,
        Arc::new(CreateCourseHandler {
            store: store.clone(),
        }),
    );
    handlers.insert(
        ActionType::CreateGoal,
        Arc::new(CreateGoalHandler {
            store: store.clone(),
        }),
    );
    handlers.insert(
        ActionType::CreateSchedule,
        Arc::new(CreateScheduleHandler {
            store: store.clone(),
        }),
    );
    handlers.insert(
        ActionType::RecommendResources,
        Arc::new(RecommendResourcesHandler),
    );
    handlers.insert(ActionType::SummarizeNotes, Arc::new(SummarizeNotesHandler));
    handlers.insert(
        ActionType::ProgressCheck,
        Arc::new(ProgressCheckHandler {
            store: store.clone(),
        }),
    );
    handlers.insert(ActionType::ReminderSet, Arc::new(ReminderSetHandler { store }));
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mentor_core::action::{CreateCoursePayload, CreateGoalPayload, ReminderSetPayload};

    async fn create_course(store: &Arc<StudyStore>) -> String {
        let handler = CreateCourseHandler {
            store: store.clone(),
        };
        let outcome = handler
            .execute(
                "alice",
                &ActionPayload::CreateCourse(CreateCoursePayload {
                    title: "Thermodynamics".into(),
                    description: None,
                    subject: Some("physics".into()),
                }),
                &HashMap::new(),
            )
            .await
            .unwrap();
        outcome.entity.unwrap().1
    }

    #[tokio::test]
    async fn goal_attaches_to_active_course() {
        let store = StudyStore::new();
        let course_id = create_course(&store).await;
        let active = HashMap::from([(EntityKind::Course, course_id.clone())]);

        let handler = CreateGoalHandler {
            store: store.clone(),
        };
        let outcome = handler
            .execute(
                "alice",
                &ActionPayload::CreateGoal(CreateGoalPayload {
                    title: "Finish chapter 1".into(),
                    course_id: None,
                    target_date: None,
                }),
                &active,
            )
            .await
            .unwrap();
        assert_eq!(outcome.data["course_id"], course_id.as_str());
    }

    #[tokio::test]
    async fn goal_without_any_course_is_validation_error() {
        let store = StudyStore::new();
        let handler = CreateGoalHandler { store };
        let err = handler
            .execute(
                "alice",
                &ActionPayload::CreateGoal(CreateGoalPayload {
                    title: "Orphan goal".into(),
                    course_id: None,
                    target_date: None,
                }),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn goal_with_unknown_course_is_not_found() {
        let store = StudyStore::new();
        let handler = CreateGoalHandler { store };
        let err = handler
            .execute(
                "alice",
                &ActionPayload::CreateGoal(CreateGoalPayload {
                    title: "Goal".into(),
                    course_id: Some("crs_missing".into()),
                    target_date: None,
                }),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn reminder_in_the_past_is_rejected() {
        let store = StudyStore::new();
        let handler = ReminderSetHandler { store };
        let err = handler
            .execute(
                "alice",
                &ActionPayload::ReminderSet(ReminderSetPayload {
                    message: "too late".into(),
                    remind_at: Utc::now() - Duration::hours(1),
                }),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn registry_covers_every_action_type() {
        let handlers = handler_registry(StudyStore::new());
        for action_type in [
            ActionType::CreateCourse,
            ActionType::CreateGoal,
            ActionType::CreateSchedule,
            ActionType::RecommendResources,
            ActionType::SummarizeNotes,
            ActionType::ProgressCheck,
            ActionType::ReminderSet,
        ] {
            assert!(handlers.contains_key(&action_type), "{}", action_type);
        }
    }
}
