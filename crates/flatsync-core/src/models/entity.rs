//! Entity kinds and the common surface shared by every synced entity

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Expense, ShoppingList, ShoppingListItem, Todo};
use crate::{Error, Result};

/// Kind of a synchronized entity.
///
/// Declaration order is push order: a shopping list always reaches the
/// server before the items that reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "shopping_list")]
    ShoppingList,
    #[serde(rename = "shopping_item", alias = "shopping_list_item")]
    ShoppingListItem,
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "expense")]
    Expense,
}

impl EntityType {
    /// All entity types in push order
    pub const ALL: [Self; 4] = [
        Self::ShoppingList,
        Self::ShoppingListItem,
        Self::Todo,
        Self::Expense,
    ];

    /// Wire name used in sync payloads and conflict reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShoppingList => "shopping_list",
            Self::ShoppingListItem => "shopping_item",
            Self::Todo => "todo",
            Self::Expense => "expense",
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "shopping_list" | "shopping_lists" => Some(Self::ShoppingList),
            "shopping_item" | "shopping_items" | "shopping_list_item" => {
                Some(Self::ShoppingListItem)
            }
            "todo" | "todos" => Some(Self::Todo),
            "expense" | "expenses" => Some(Self::Expense),
            _ => None,
        }
    }

    /// Local table holding rows of this type
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::ShoppingList => "shopping_lists",
            Self::ShoppingListItem => "shopping_items",
            Self::Todo => "todos",
            Self::Expense => "expenses",
        }
    }

    /// REST collection path, relative to the API base URL.
    ///
    /// Shopping items are addressed individually under this path but listed
    /// and created under their parent list.
    #[must_use]
    pub const fn collection_path(self) -> &'static str {
        match self {
            Self::ShoppingList => "api/v1/shopping-lists",
            Self::ShoppingListItem => "api/v1/shopping-items",
            Self::Todo => "api/v1/todos",
            Self::Expense => "api/v1/expenses",
        }
    }

    /// Whether rows are scoped by a parent entity instead of the household
    #[must_use]
    pub const fn has_parent(self) -> bool {
        matches!(self, Self::ShoppingListItem)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidInput(format!("Unknown entity type '{s}'")))
    }
}

/// Common surface of an entity that participates in sync.
pub trait Syncable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind tag for this type
    const ENTITY_TYPE: EntityType;

    /// Stable identifier, assigned by whichever replica created the entity
    fn id(&self) -> &str;

    /// Last modification time
    fn updated_at(&self) -> DateTime<Utc>;

    /// Set the last modification time
    fn touch(&mut self, at: DateTime<Utc>);

    /// Check field-level invariants before the entity is stored or applied
    fn validate(&self) -> Result<()>;

    fn into_entity(self) -> SyncEntity;

    fn from_entity(entity: SyncEntity) -> Option<Self>;
}

/// Any synchronized entity.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEntity {
    ShoppingList(ShoppingList),
    ShoppingListItem(ShoppingListItem),
    Todo(Todo),
    Expense(Expense),
}

impl SyncEntity {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::ShoppingList(_) => EntityType::ShoppingList,
            Self::ShoppingListItem(_) => EntityType::ShoppingListItem,
            Self::Todo(_) => EntityType::Todo,
            Self::Expense(_) => EntityType::Expense,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::ShoppingList(list) => list.id(),
            Self::ShoppingListItem(item) => item.id(),
            Self::Todo(todo) => todo.id(),
            Self::Expense(expense) => expense.id(),
        }
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::ShoppingList(list) => list.updated_at(),
            Self::ShoppingListItem(item) => item.updated_at(),
            Self::Todo(todo) => todo.updated_at(),
            Self::Expense(expense) => expense.updated_at(),
        }
    }

    /// Last modification time in Unix milliseconds
    #[must_use]
    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at().timestamp_millis()
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        match self {
            Self::ShoppingList(list) => list.touch(at),
            Self::ShoppingListItem(item) => item.touch(at),
            Self::Todo(todo) => todo.touch(at),
            Self::Expense(expense) => expense.touch(at),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ShoppingList(list) => list.validate(),
            Self::ShoppingListItem(item) => item.validate(),
            Self::Todo(todo) => todo.validate(),
            Self::Expense(expense) => expense.validate(),
        }
    }

    /// Household that owns the entity, when the entity carries one directly
    #[must_use]
    pub fn household_id(&self) -> Option<&str> {
        match self {
            Self::ShoppingList(list) => Some(&list.household_id),
            Self::ShoppingListItem(_) => None,
            Self::Todo(todo) => Some(&todo.household_id),
            Self::Expense(expense) => Some(&expense.household_id),
        }
    }

    /// Parent entity id for types scoped under another entity
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::ShoppingListItem(item) => Some(&item.shopping_list_id),
            _ => None,
        }
    }

    /// Serialize to the JSON payload stored locally and sent on the wire
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::ShoppingList(list) => serde_json::to_value(list)?,
            Self::ShoppingListItem(item) => serde_json::to_value(item)?,
            Self::Todo(todo) => serde_json::to_value(todo)?,
            Self::Expense(expense) => serde_json::to_value(expense)?,
        };
        Ok(value)
    }

    /// Decode and validate a payload of the given type
    pub fn from_payload(entity_type: EntityType, payload: serde_json::Value) -> Result<Self> {
        let entity = match entity_type {
            EntityType::ShoppingList => Self::ShoppingList(serde_json::from_value(payload)?),
            EntityType::ShoppingListItem => {
                Self::ShoppingListItem(serde_json::from_value(payload)?)
            }
            EntityType::Todo => Self::Todo(serde_json::from_value(payload)?),
            EntityType::Expense => Self::Expense(serde_json::from_value(payload)?),
        };
        entity.validate()?;
        Ok(entity)
    }
}

impl From<Todo> for SyncEntity {
    fn from(todo: Todo) -> Self {
        Self::Todo(todo)
    }
}

impl From<ShoppingList> for SyncEntity {
    fn from(list: ShoppingList) -> Self {
        Self::ShoppingList(list)
    }
}

impl From<ShoppingListItem> for SyncEntity {
    fn from(item: ShoppingListItem) -> Self {
        Self::ShoppingListItem(item)
    }
}

impl From<Expense> for SyncEntity {
    fn from(expense: Expense) -> Self {
        Self::Expense(expense)
    }
}

/// Reject blank identifiers and required text fields.
pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_type_wire_names() {
        assert_eq!(EntityType::parse("shopping_list"), Some(EntityType::ShoppingList));
        assert_eq!(
            EntityType::parse("shopping-items"),
            Some(EntityType::ShoppingListItem)
        );
        assert_eq!(EntityType::parse("TODO"), Some(EntityType::Todo));
        assert_eq!(EntityType::parse("note"), None);
        assert_eq!(
            serde_json::to_value(EntityType::ShoppingListItem).unwrap(),
            json!("shopping_item")
        );
    }

    #[test]
    fn push_order_puts_parents_first() {
        let mut types = vec![
            EntityType::Expense,
            EntityType::ShoppingListItem,
            EntityType::Todo,
            EntityType::ShoppingList,
        ];
        types.sort();
        assert_eq!(types, EntityType::ALL.to_vec());
    }

    #[test]
    fn from_payload_rejects_invalid_entity() {
        let payload = json!({
            "id": "t1",
            "household_id": "h1",
            "title": "   ",
            "created_by": "u1",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        assert!(SyncEntity::from_payload(EntityType::Todo, payload).is_err());
    }

    #[test]
    fn from_payload_rejects_wrong_shape() {
        let payload = json!({ "id": 42 });
        assert!(SyncEntity::from_payload(EntityType::Expense, payload).is_err());
    }
}
