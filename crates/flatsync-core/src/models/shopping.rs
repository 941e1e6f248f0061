//! Shopping list and item models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::require_text;
use super::{amount, new_id, timestamp, EntityType, SyncEntity, Syncable};
use crate::util::{is_decimal_amount, utc_now};
use crate::{Error, Result};

wire_enum! {
    pub enum ShoppingListStatus (default = Active) {
        Active => "ACTIVE",
        Archived => "ARCHIVED",
    }
}

/// A named shopping list shared by the household
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingList {
    pub id: String,
    pub household_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ShoppingListStatus,
    pub created_by: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl ShoppingList {
    #[must_use]
    pub fn new(
        household_id: impl Into<String>,
        created_by: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = utc_now();
        Self {
            id: new_id(),
            household_id: household_id.into(),
            name: name.into(),
            description: None,
            status: ShoppingListStatus::Active,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Syncable for ShoppingList {
    const ENTITY_TYPE: EntityType = EntityType::ShoppingList;

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
        require_text("shopping list id", &self.id)?;
        require_text("household id", &self.household_id)?;
        require_text("shopping list name", &self.name)
    }

    fn into_entity(self) -> SyncEntity {
        SyncEntity::ShoppingList(self)
    }

    fn from_entity(entity: SyncEntity) -> Option<Self> {
        match entity {
            SyncEntity::ShoppingList(list) => Some(list),
            _ => None,
        }
    }
}

const fn default_quantity() -> f64 {
    1.0
}

/// An item on a shopping list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingListItem {
    pub id: String,
    /// Parent list
    #[serde(alias = "list_id")]
    pub shopping_list_id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_purchased: bool,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    /// Decimal string, never a float
    #[serde(default, deserialize_with = "amount::option")]
    pub price: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub position: i32,
    pub created_by: String,
    /// Member who checked the item off
    #[serde(default, alias = "purchased_by")]
    pub checked_off_by: Option<String>,
    #[serde(default, alias = "purchased_at", with = "timestamp::option")]
    pub checked_off_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl ShoppingListItem {
    #[must_use]
    pub fn new(
        shopping_list_id: impl Into<String>,
        created_by: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = utc_now();
        Self {
            id: new_id(),
            shopping_list_id: shopping_list_id.into(),
            name: name.into(),
            quantity: default_quantity(),
            unit: None,
            category: None,
            is_purchased: false,
            assigned_to_id: None,
            price: None,
            notes: None,
            position: 0,
            created_by: created_by.into(),
            checked_off_by: None,
            checked_off_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark purchased or not, recording who checked it off
    pub fn set_purchased(&mut self, purchased: bool, by: Option<String>, at: DateTime<Utc>) {
        self.is_purchased = purchased;
        if purchased {
            self.checked_off_by = by;
            self.checked_off_at = Some(at);
        } else {
            self.checked_off_by = None;
            self.checked_off_at = None;
        }
    }
}

impl Syncable for ShoppingListItem {
    const ENTITY_TYPE: EntityType = EntityType::ShoppingListItem;

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
        require_text("shopping item id", &self.id)?;
        require_text("shopping list id", &self.shopping_list_id)?;
        require_text("shopping item name", &self.name)?;
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(Error::InvalidInput(format!(
                "Invalid quantity {} for item {}",
                self.quantity, self.id
            )));
        }
        if let Some(price) = &self.price {
            if !is_decimal_amount(price) {
                return Err(Error::InvalidInput(format!("Invalid price '{price}'")));
            }
        }
        Ok(())
    }

    fn into_entity(self) -> SyncEntity {
        SyncEntity::ShoppingListItem(self)
    }

    fn from_entity(entity: SyncEntity) -> Option<Self> {
        match entity {
            SyncEntity::ShoppingListItem(item) => Some(item),
            _ => None,
        }
    }
}
