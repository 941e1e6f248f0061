//! Wire types for the combined `/sync` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EntityType, Operation, OutboxEntry, SyncConflict};

/// Changes to one entity type in a sync request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityChanges {
    #[serde(default)]
    pub created: Vec<Value>,
    #[serde(default)]
    pub updated: Vec<Value>,
    /// Ids of deleted entities
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl EntityChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Local changes pushed with a sync request. Types without changes are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<EntityChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopping_lists: Option<EntityChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopping_items: Option<EntityChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expenses: Option<EntityChanges>,
}

impl SyncChanges {
    /// Build the change set for a batch of outbox entries.
    pub fn from_entries(entries: &[OutboxEntry]) -> Self {
        let mut changes = Self::default();
        for entry in entries {
            let bucket = changes.slot_mut(entry.entity_type).get_or_insert_with(Default::default);
            match entry.operation {
                Operation::Create => bucket.created.push(entry.payload.clone()),
                Operation::Update => bucket.updated.push(entry.payload.clone()),
                Operation::Delete => bucket.deleted.push(entry.entity_id.clone()),
            }
        }
        changes
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&EntityChanges> {
        match entity_type {
            EntityType::Todo => self.todos.as_ref(),
            EntityType::ShoppingList => self.shopping_lists.as_ref(),
            EntityType::ShoppingListItem => self.shopping_items.as_ref(),
            EntityType::Expense => self.expenses.as_ref(),
        }
    }

    fn slot_mut(&mut self, entity_type: EntityType) -> &mut Option<EntityChanges> {
        match entity_type {
            EntityType::Todo => &mut self.todos,
            EntityType::ShoppingList => &mut self.shopping_lists,
            EntityType::ShoppingListItem => &mut self.shopping_items,
            EntityType::Expense => &mut self.expenses,
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityType::ALL
            .iter()
            .all(|entity_type| self.get(*entity_type).is_none_or(EntityChanges::is_empty))
    }
}

/// Body of `POST /api/v1/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Watermark in Unix milliseconds; 0 asks for everything
    pub last_sync_timestamp: i64,
    pub household_id: String,
    #[serde(default)]
    pub changes: SyncChanges,
}

/// Ids the server reports as deleted since the watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedIds {
    #[serde(default)]
    pub todos: Vec<String>,
    #[serde(default)]
    pub shopping_lists: Vec<String>,
    #[serde(default)]
    pub shopping_items: Vec<String>,
    #[serde(default)]
    pub expenses: Vec<String>,
}

impl DeletedIds {
    pub fn ids(&self, entity_type: EntityType) -> &[String] {
        match entity_type {
            EntityType::Todo => &self.todos,
            EntityType::ShoppingList => &self.shopping_lists,
            EntityType::ShoppingListItem => &self.shopping_items,
            EntityType::Expense => &self.expenses,
        }
    }
}

/// Response of `POST /api/v1/sync`.
///
/// Entity lists stay raw JSON so one malformed entity cannot fail the whole
/// response; each is decoded and validated during merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Server clock (Unix ms) the response is consistent with
    pub server_timestamp: i64,
    #[serde(default)]
    pub todos: Vec<Value>,
    #[serde(default)]
    pub shopping_lists: Vec<Value>,
    #[serde(default)]
    pub shopping_items: Vec<Value>,
    #[serde(default)]
    pub expenses: Vec<Value>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    /// Not sent by every server version
    #[serde(default)]
    pub deleted: DeletedIds,
}

impl SyncResponse {
    pub fn entities(&self, entity_type: EntityType) -> &[Value] {
        match entity_type {
            EntityType::Todo => &self.todos,
            EntityType::ShoppingList => &self.shopping_lists,
            EntityType::ShoppingListItem => &self.shopping_items,
            EntityType::Expense => &self.expenses,
        }
    }

    pub fn entities_mut(&mut self, entity_type: EntityType) -> &mut Vec<Value> {
        match entity_type {
            EntityType::Todo => &mut self.todos,
            EntityType::ShoppingList => &mut self.shopping_lists,
            EntityType::ShoppingListItem => &mut self.shopping_items,
            EntityType::Expense => &mut self.expenses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(entity_type: EntityType, id: &str, operation: Operation) -> OutboxEntry {
        OutboxEntry {
            id: 1,
            entity_type,
            entity_id: id.to_string(),
            household_id: "h1".to_string(),
            operation,
            payload: json!({ "id": id }),
            created_at: 0,
            retry_count: 0,
            last_error: None,
            revision: 0,
            held: false,
        }
    }

    #[test]
    fn request_omits_types_without_changes() {
        let changes = SyncChanges::from_entries(&[
            entry(EntityType::Todo, "t1", Operation::Create),
            entry(EntityType::Todo, "t2", Operation::Delete),
        ]);
        let request = SyncRequest {
            last_sync_timestamp: 0,
            household_id: "h1".to_string(),
            changes,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "last_sync_timestamp": 0,
                "household_id": "h1",
                "changes": {
                    "todos": {
                        "created": [{ "id": "t1" }],
                        "updated": [],
                        "deleted": ["t2"],
                    }
                }
            })
        );
    }

    #[test]
    fn empty_changes_are_detected() {
        assert!(SyncChanges::default().is_empty());
        let changes = SyncChanges::from_entries(&[entry(
            EntityType::Expense,
            "e1",
            Operation::Update,
        )]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn response_tolerates_missing_optional_lists() {
        let response: SyncResponse = serde_json::from_value(json!({
            "server_timestamp": 1_700_000_000_000_i64,
            "todos": [{ "id": "t1" }],
        }))
        .unwrap();

        assert_eq!(response.entities(EntityType::Todo).len(), 1);
        assert!(response.conflicts.is_empty());
        assert!(response.deleted.ids(EntityType::Expense).is_empty());
    }
}
