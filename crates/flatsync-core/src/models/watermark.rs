//! Per-household sync watermark

use serde::{Deserialize, Serialize};

/// How far pulls for a household have progressed, plus failure bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub household_id: String,
    /// Server timestamp (Unix ms) covered by the last complete round.
    /// Never decreases.
    pub last_sync_timestamp: i64,
    /// Failed rounds since the last success
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// When the last round finished, successfully or not (Unix ms)
    pub last_round_at: Option<i64>,
}

impl SyncWatermark {
    #[must_use]
    pub fn new(household_id: impl Into<String>) -> Self {
        Self {
            household_id: household_id.into(),
            ..Self::default()
        }
    }
}
