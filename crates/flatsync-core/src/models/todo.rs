//! Todo model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::require_text;
use super::{new_id, timestamp, EntityType, SyncEntity, Syncable};
use crate::util::utc_now;
use crate::Result;

wire_enum! {
    /// Progress of a todo
    pub enum TodoStatus (default = Pending) {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
    }
}

wire_enum! {
    pub enum TodoPriority (default = Medium) {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Urgent => "URGENT",
    }
}

/// A household task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Unique identifier
    pub id: String,
    /// Owning household
    pub household_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
    #[serde(default, with = "timestamp::option")]
    pub due_date: Option<DateTime<Utc>>,
    /// Member the task is assigned to
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    /// Member who created the task
    pub created_by: String,
    /// Set when the task moves to completed
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    /// Create a pending todo stamped with the current time
    #[must_use]
    pub fn new(
        household_id: impl Into<String>,
        created_by: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = utc_now();
        Self {
            id: new_id(),
            household_id: household_id.into(),
            title: title.into(),
            description: None,
            status: TodoStatus::Pending,
            priority: TodoPriority::Medium,
            due_date: None,
            assigned_to_id: None,
            created_by: created_by.into(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Change status, keeping `completed_at` consistent with it
    pub fn set_status(&mut self, status: TodoStatus, at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = (status == TodoStatus::Completed).then_some(at);
    }
}

impl Syncable for Todo {
    const ENTITY_TYPE: EntityType = EntityType::Todo;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn validate(&self) -> Result<()> {
        require_text("todo id", &self.id)?;
        require_text("household id", &self.household_id)?;
        require_text("todo title", &self.title)
    }

    fn into_entity(self) -> SyncEntity {
        SyncEntity::Todo(self)
    }

    fn from_entity(entity: SyncEntity) -> Option<Self> {
        match entity {
            SyncEntity::Todo(todo) => Some(todo),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_backend_shape() {
        let todo: Todo = serde_json::from_value(json!({
            "id": "t1",
            "household_id": "h1",
            "title": "Take out trash",
            "status": "in_progress",
            "priority": "HIGH",
            "due_date": null,
            "created_by": "u1",
            "created_at": "2024-03-01T10:00:00",
            "updated_at": "2024-03-01T10:05:00.250000",
        }))
        .unwrap();

        assert_eq!(todo.status, TodoStatus::InProgress);
        assert_eq!(todo.priority, TodoPriority::High);
        assert_eq!(todo.description, None);
        assert_eq!(todo.updated_at.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_default() {
        let todo: Todo = serde_json::from_value(json!({
            "id": "t1",
            "household_id": "h1",
            "title": "Water plants",
            "status": "ARCHIVED",
            "priority": "CRITICAL",
            "created_by": "u1",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-01T10:00:00Z",
        }))
        .unwrap();

        assert_eq!(todo.status, TodoStatus::Pending);
        assert_eq!(todo.priority, TodoPriority::Medium);
    }

    #[test]
    fn completing_sets_completed_at() {
        let mut todo = Todo::new("h1", "u1", "Vacuum");
        let at = Utc::now();
        todo.set_status(TodoStatus::Completed, at);
        assert_eq!(todo.completed_at, Some(at));

        todo.set_status(TodoStatus::Pending, at);
        assert_eq!(todo.completed_at, None);
    }

    #[test]
    fn serializes_enums_upper_case() {
        let todo = Todo::new("h1", "u1", "Vacuum");
        let value = serde_json::to_value(&todo).unwrap();
        assert_eq!(value["status"], json!("PENDING"));
        assert_eq!(value["priority"], json!("MEDIUM"));
    }
}
