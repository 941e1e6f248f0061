//! Expense model
//!
//! Splits travel embedded in their expense and are never synced on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::require_text;
use super::{amount, new_id, timestamp, EntityType, SyncEntity, Syncable};
use crate::util::{is_decimal_amount, utc_now};
use crate::{Error, Result};

wire_enum! {
    pub enum ExpenseCategory (default = Other) {
        Groceries => "GROCERIES",
        Utilities => "UTILITIES",
        Rent => "RENT",
        Internet => "INTERNET",
        Cleaning => "CLEANING",
        Maintenance => "MAINTENANCE",
        Entertainment => "ENTERTAINMENT",
        Food => "FOOD",
        Transportation => "TRANSPORTATION",
        Other => "OTHER",
    }
}

wire_enum! {
    pub enum PaymentMethod (default = Cash) {
        Cash => "CASH",
        Card => "CARD",
        BankTransfer => "BANK_TRANSFER",
        DigitalWallet => "DIGITAL_WALLET",
        Other => "OTHER",
    }
}

wire_enum! {
    /// How the amount is divided between members
    pub enum SplitType (default = Equal) {
        Equal => "EQUAL",
        Custom => "CUSTOM",
        Percentage => "PERCENTAGE",
    }
}

/// One member's share of an expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSplit {
    pub id: String,
    pub expense_id: String,
    pub user_id: String,
    /// Decimal string
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount_owed: String,
    #[serde(default)]
    pub is_settled: bool,
    #[serde(default, with = "timestamp::option")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default = "utc_now", with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// A shared (or personal) expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub household_id: String,
    pub created_by: String,
    /// Total amount as a decimal string
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount: String,
    pub description: String,
    #[serde(default)]
    pub category: ExpenseCategory,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// When the money was spent
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub split_type: SplitType,
    #[serde(default)]
    pub is_personal: bool,
    #[serde(default)]
    pub splits: Vec<ExpenseSplit>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    #[must_use]
    pub fn new(
        household_id: impl Into<String>,
        created_by: impl Into<String>,
        amount: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = utc_now();
        Self {
            id: new_id(),
            household_id: household_id.into(),
            created_by: created_by.into(),
            amount: amount.into(),
            description: description.into(),
            category: ExpenseCategory::Other,
            payment_method: PaymentMethod::Cash,
            date: now,
            split_type: SplitType::Equal,
            is_personal: false,
            splits: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a split owed by `user_id`
    pub fn add_split(&mut self, user_id: impl Into<String>, amount_owed: impl Into<String>) {
        self.splits.push(ExpenseSplit {
            id: new_id(),
            expense_id: self.id.clone(),
            user_id: user_id.into(),
            amount_owed: amount_owed.into(),
            is_settled: false,
            settled_at: None,
            created_at: utc_now(),
        });
    }

    /// Mark the given member's split settled. Returns false when no split matches.
    pub fn settle_split(&mut self, user_id: &str, at: DateTime<Utc>) -> bool {
        let Some(split) = self.splits.iter_mut().find(|split| split.user_id == user_id) else {
            return false;
        };
        split.is_settled = true;
        split.settled_at = Some(at);
        true
    }
}

impl Syncable for Expense {
    const ENTITY_TYPE: EntityType = EntityType::Expense;

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
        require_text("expense id", &self.id)?;
        require_text("household id", &self.household_id)?;
        require_text("expense description", &self.description)?;
        if !is_decimal_amount(&self.amount) {
            return Err(Error::InvalidInput(format!(
                "Invalid expense amount '{}'",
                self.amount
            )));
        }
        for split in &self.splits {
            if split.expense_id != self.id {
                return Err(Error::InvalidInput(format!(
                    "Split {} belongs to expense {}, not {}",
                    split.id, split.expense_id, self.id
                )));
            }
            if !is_decimal_amount(&split.amount_owed) {
                return Err(Error::InvalidInput(format!(
                    "Invalid split amount '{}'",
                    split.amount_owed
                )));
            }
        }
        Ok(())
    }

    fn into_entity(self) -> SyncEntity {
        SyncEntity::Expense(self)
    }

    fn from_entity(entity: SyncEntity) -> Option<Self> {
        match entity {
            SyncEntity::Expense(expense) => Some(expense),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_survive_as_strings() {
        let mut expense = Expense::new("h1", "u1", "60.10", "Groceries");
        expense.add_split("u1", "30.05");
        expense.add_split("u2", "30.05");

        let value = serde_json::to_value(&expense).unwrap();
        assert_eq!(value["amount"], json!("60.10"));
        assert_eq!(value["splits"][1]["amount_owed"], json!("30.05"));

        let back: Expense = serde_json::from_value(value).unwrap();
        assert_eq!(back, expense);
    }

    #[test]
    fn backend_lower_case_enums_are_accepted() {
        let expense: Expense = serde_json::from_value(json!({
            "id": "e1",
            "household_id": "h1",
            "created_by": "u1",
            "amount": "12.00",
            "description": "Bin bags",
            "category": "cleaning",
            "payment_method": "bank_transfer",
            "date": "2024-03-01T00:00:00",
            "split_type": "equal",
            "created_at": "2024-03-01T00:00:00",
            "updated_at": "2024-03-01T00:00:00",
        }))
        .unwrap();

        assert_eq!(expense.category, ExpenseCategory::Cleaning);
        assert_eq!(expense.payment_method, PaymentMethod::BankTransfer);
        assert!(expense.splits.is_empty());
    }

    #[test]
    fn validate_checks_split_ownership() {
        let mut expense = Expense::new("h1", "u1", "10", "Pizza");
        expense.add_split("u2", "5");
        expense.splits[0].expense_id = "other".to_string();
        assert!(expense.validate().is_err());
    }

    #[test]
    fn settle_split_marks_member_share() {
        let mut expense = Expense::new("h1", "u1", "10", "Pizza");
        expense.add_split("u2", "5");
        assert!(expense.settle_split("u2", Utc::now()));
        assert!(expense.splits[0].is_settled);
        assert!(!expense.settle_split("u3", Utc::now()));
    }
}
