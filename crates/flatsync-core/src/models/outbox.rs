//! Outbox entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::EntityType;
use crate::{Error, Result};

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::Database(format!("Unknown outbox operation '{other}'"))),
        }
    }
}

/// A queued local mutation awaiting acknowledgement by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Auto-incrementing id; FIFO order within an entity type
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Household whose round pushes this entry
    pub household_id: String,
    pub operation: Operation,
    /// Entity snapshot at enqueue time
    pub payload: serde_json::Value,
    /// Enqueue time (Unix ms)
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Bumped whenever a later mutation is coalesced into this entry
    pub revision: i64,
    /// Parked while the entity awaits conflict resolution
    pub held: bool,
}

impl OutboxEntry {
    /// Whether the entry has exhausted automatic retries
    #[must_use]
    pub const fn is_stuck(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }
}
