//! Local row of a synced entity together with its sync metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityType, SyncEntity};
use crate::{Error, Result};

/// Relationship between a local row and the last known server state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Matches the last known server state
    Synced,
    /// Local change not yet acknowledged
    Pending,
    /// Diverged from the server; waiting for the user
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "SYNCED",
            Self::Pending => "PENDING",
            Self::Conflict => "CONFLICT",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SYNCED" => Ok(Self::Synced),
            "PENDING" => Ok(Self::Pending),
            "CONFLICT" => Ok(Self::Conflict),
            other => Err(Error::Database(format!("Unknown sync status '{other}'"))),
        }
    }
}

/// A stored entity and its sync bookkeeping.
///
/// `last_modified_locally` is set exactly when `sync_status` is not
/// [`SyncStatus::Synced`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub entity: SyncEntity,
    pub household_id: String,
    pub sync_status: SyncStatus,
    /// Server `updated_at` (Unix ms) the local edit was based on; `None` for
    /// rows created locally and never acknowledged
    pub base_updated_at: Option<i64>,
    pub last_modified_locally: Option<i64>,
    /// Deleted locally, delete not yet acknowledged
    pub is_deleted: bool,
    /// Server snapshot kept while the row is in conflict
    pub remote_payload: Option<serde_json::Value>,
}

impl LocalRecord {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.entity.id()
    }

    #[must_use]
    pub fn updated_at_ms(&self) -> i64 {
        self.entity.updated_at_ms()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.sync_status != SyncStatus::Synced
    }
}
