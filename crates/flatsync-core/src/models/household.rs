//! Household directory models
//!
//! These scope synced data locally and are kept current from the server, but
//! the engine never pushes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;

wire_enum! {
    pub enum MemberRole (default = Member) {
        Owner => "OWNER",
        Member => "MEMBER",
    }
}

/// A household whose data is synced on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub invite_code: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Membership of a user in a household
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdMember {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(with = "timestamp")]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}
