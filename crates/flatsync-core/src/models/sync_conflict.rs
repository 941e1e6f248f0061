//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::EntityType;

wire_enum! {
    /// Which sides changed or deleted the entity
    pub enum ConflictType (default = UpdateUpdate) {
        /// Both sides edited
        UpdateUpdate => "UPDATE_UPDATE",
        /// Local delete against a remote edit
        DeleteUpdate => "DELETE_UPDATE",
        /// Local edit against a remote delete
        UpdateDelete => "UPDATE_DELETE",
    }
}

/// Conflict reported by the server for a pushed change.
///
/// Lives only for the round that produced it; afterwards the conflict is
/// represented by the entity's `CONFLICT` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Wire name of the entity type
    pub entity_type: String,
    pub entity_id: String,
    /// Opaque version marker of the local copy
    #[serde(default)]
    pub local_version: String,
    /// Opaque version marker of the server copy
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub conflict_type: ConflictType,
}

impl SyncConflict {
    /// Parsed entity type, if the server sent a known one
    #[must_use]
    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::parse(&self.entity_type)
    }
}
