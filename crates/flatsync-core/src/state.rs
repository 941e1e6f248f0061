//! Sync health reported to front ends.

/// Coarse sync status a UI can render without knowing about rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncHealth {
    /// No round has run yet
    Idle,
    Syncing,
    /// Last round completed
    Synced,
    /// Connectivity observer reports no network
    Offline,
    /// Server rejected the bearer token; rounds wait for a new one
    AuthRequired,
    /// Rounds keep failing; carries the failure count and last error
    Failing { consecutive_failures: u32, last_error: String },
}

impl SyncHealth {
    /// Whether the UI should show a persistent "sync failing" affordance
    pub const fn needs_attention(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::Failing { .. })
    }
}
