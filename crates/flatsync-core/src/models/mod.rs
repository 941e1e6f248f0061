//! Data models for Flatsync

/// Declare a string-backed wire enum.
///
/// Values are upper-case on the wire. Unknown strings read back as the
/// declared default so a newer server cannot break older clients.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident (default = $default:ident) {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// All values in declaration order
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire representation
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            /// Parse a wire value, case-insensitively
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                let raw = raw.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|value| value.as_str().eq_ignore_ascii_case(raw))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::parse(&raw).unwrap_or(Self::$default)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod amount;
mod entity;
mod expense;
mod household;
mod outbox;
mod record;
mod shopping;
mod sync_conflict;
pub mod timestamp;
mod todo;
mod watermark;

pub use entity::{EntityType, SyncEntity, Syncable};
pub use expense::{Expense, ExpenseCategory, ExpenseSplit, PaymentMethod, SplitType};
pub use household::{Household, HouseholdMember, MemberRole, User};
pub use outbox::{Operation, OutboxEntry};
pub use record::{LocalRecord, SyncStatus};
pub use shopping::{ShoppingList, ShoppingListItem, ShoppingListStatus};
pub use sync_conflict::{ConflictType, SyncConflict};
pub use todo::{Todo, TodoPriority, TodoStatus};
pub use watermark::SyncWatermark;

/// Generate a new entity identifier (UUID v7, time-sortable)
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
