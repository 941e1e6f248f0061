//! Sync engine configuration.

use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(2);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 8;

/// Tuning for sync rounds and the background scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Outbox entries pushed per round
    pub batch_size: usize,
    /// Failed pushes before an entry is held back from automatic batches
    pub max_retries: u32,
    /// Bound on every network call
    pub request_timeout: Duration,
    /// Periodic round interval; `None` disables the timer
    pub sync_interval: Option<Duration>,
    /// First retry delay after a failed round
    pub backoff_initial: Duration,
    /// Upper bound on the retry delay
    pub backoff_max: Duration,
    /// Failed rounds in a row before the scheduler reports sync as failing
    pub max_consecutive_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl SyncConfig {
    /// Set the periodic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable periodic sync (trigger and reconnect only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry delay range used after failed rounds
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn with_max_consecutive_failures(mut self, rounds: u32) -> Self {
        self.max_consecutive_failures = rounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retry_policy() {
        let config = SyncConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_initial, Duration::from_secs(2));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
    }

    #[test]
    fn builders_override_defaults() {
        let config = SyncConfig::default()
            .without_auto_sync()
            .with_batch_size(10)
            .with_max_retries(1);
        assert_eq!(config.sync_interval, None);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 1);

        let config = config.with_sync_interval(Duration::from_secs(60));
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
    }
}
