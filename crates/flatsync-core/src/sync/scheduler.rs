//! Background task deciding when rounds run.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::engine::SyncEngine;
use super::transport::SyncTransport;
use super::SyncError;
use crate::state::SyncHealth;

/// Runs rounds for one household on explicit triggers, on a timer, and when
/// connectivity comes back. Failed rounds are retried with backoff.
pub struct SyncScheduler {
    trigger: mpsc::Sender<()>,
    health: watch::Receiver<SyncHealth>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the background task.
    ///
    /// `online` is the connectivity feed; rounds are skipped while it reads
    /// `false`, and one runs as soon as it flips back to `true`.
    pub fn spawn<T: SyncTransport + 'static>(
        engine: Arc<SyncEngine<T>>,
        household_id: impl Into<String>,
        online: watch::Receiver<bool>,
    ) -> Self {
        let (trigger, triggers) = mpsc::channel(1);
        let (health_tx, health) = watch::channel(SyncHealth::Idle);
        let cancel = CancellationToken::new();

        let task = Task {
            engine,
            household_id: household_id.into(),
            triggers,
            online: Some(online),
            health: health_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        Self {
            trigger,
            health,
            cancel,
            handle,
        }
    }

    /// Ask for a round now (app foregrounded, pull-to-refresh, local edit).
    ///
    /// Requests made while one is already pending collapse into it.
    pub fn trigger(&self) {
        if self.trigger.try_send(()).is_err() {
            tracing::trace!("Sync already requested");
        }
    }

    /// Current health; `changed()` on the receiver wakes on every update.
    pub fn health(&self) -> watch::Receiver<SyncHealth> {
        self.health.clone()
    }

    /// Stop the task, cancelling a round in flight.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.handle.await {
            tracing::warn!("Sync scheduler task ended abnormally: {error}");
        }
    }
}

struct Task<T> {
    engine: Arc<SyncEngine<T>>,
    household_id: String,
    triggers: mpsc::Receiver<()>,
    online: Option<watch::Receiver<bool>>,
    health: watch::Sender<SyncHealth>,
    cancel: CancellationToken,
}

impl<T: SyncTransport + 'static> Task<T> {
    async fn run(mut self) {
        let config = self.engine.config().clone();
        let mut backoff = Backoff::from_config(&config);
        let mut interval = config.sync_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut retry_at: Option<Instant> = None;
        let mut failures: u32 = 0;
        let mut is_online = self.online.as_ref().is_none_or(|online| *online.borrow());

        if !is_online {
            self.publish(SyncHealth::Offline);
        }

        loop {
            let due = tokio::select! {
                () = self.cancel.cancelled() => break,
                request = self.triggers.recv() => {
                    if request.is_none() {
                        break;
                    }
                    true
                }
                now_online = connectivity_change(&mut self.online) => {
                    let regained = now_online && !is_online;
                    is_online = now_online;
                    if is_online {
                        tracing::debug!("Connectivity regained");
                    } else {
                        self.publish(SyncHealth::Offline);
                    }
                    regained
                }
                () = tick(&mut interval) => true,
                () = sleep_until(retry_at) => {
                    retry_at = None;
                    true
                }
            };
            if !due || !is_online {
                continue;
            }

            self.publish(SyncHealth::Syncing);
            match self.engine.sync_household(&self.household_id, &self.cancel).await {
                Ok(_) => {
                    backoff.reset();
                    failures = 0;
                    retry_at = None;
                    self.publish(SyncHealth::Synced);
                }
                Err(SyncError::Cancelled) if self.cancel.is_cancelled() => break,
                Err(SyncError::Cancelled) => self.publish(SyncHealth::Idle),
                Err(SyncError::Auth) => {
                    retry_at = None;
                    self.publish(SyncHealth::AuthRequired);
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff.next_delay();
                    retry_at = Some(Instant::now() + delay);
                    tracing::warn!(
                        "Sync round failed ({failures} in a row), retrying in {}s: {error}",
                        delay.as_secs()
                    );
                    if failures >= config.max_consecutive_failures {
                        self.publish(SyncHealth::Failing {
                            consecutive_failures: failures,
                            last_error: error.to_string(),
                        });
                    } else {
                        self.publish(SyncHealth::Idle);
                    }
                }
            }
        }
        tracing::debug!("Sync scheduler for {} stopped", self.household_id);
    }

    fn publish(&self, health: SyncHealth) {
        self.health.send_replace(health);
    }
}

/// Next connectivity value. Pends forever once the observer is gone.
async fn connectivity_change(online: &mut Option<watch::Receiver<bool>>) -> bool {
    let Some(receiver) = online else {
        return pending().await;
    };
    if receiver.changed().await.is_err() {
        *online = None;
        return pending().await;
    }
    *receiver.borrow_and_update()
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
