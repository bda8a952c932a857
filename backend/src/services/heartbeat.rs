//! Periodic sweep that takes silently disconnected devices offline.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::presence::PresenceStatus;
use crate::repositories::presence_store::PresenceStoreError;
use crate::services::presence::PresenceTracker;
use crate::types::UserId;

/// Receives aggregate presence transitions detected outside a connection's
/// own lifecycle.
#[async_trait]
pub trait PresenceNotifier: Send + Sync {
    async fn presence_changed(&self, user_id: UserId, status: PresenceStatus);
}

pub struct HeartbeatMonitor {
    tracker: Arc<PresenceTracker>,
    notifier: Option<Arc<dyn PresenceNotifier>>,
    interval: StdDuration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(tracker: Arc<PresenceTracker>, interval_seconds: u64, timeout_seconds: u64) -> Self {
        Self {
            tracker,
            notifier: None,
            interval: StdDuration::from_secs(interval_seconds.max(1)),
            timeout: Duration::seconds(i64::try_from(timeout_seconds).unwrap_or(i64::MAX / 1000)),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PresenceNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn sweep(&self) -> Result<usize, PresenceStoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Runs one sweep as of `now` and returns the number of devices taken
    /// offline. A failure on one user is logged and does not stop the sweep.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, PresenceStoreError> {
        let users = self.tracker.tracked_users().await?;
        let mut expired_total = 0;

        for user_id in users {
            let outcome = match self
                .tracker
                .expire_stale_devices(user_id, now, self.timeout)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(error = %err, %user_id, "Heartbeat sweep failed for user");
                    continue;
                }
            };
            expired_total += outcome.expired_devices;

            if outcome.went_offline {
                tracing::info!(%user_id, "User timed out on all devices");
                if let Some(notifier) = &self.notifier {
                    notifier
                        .presence_changed(user_id, PresenceStatus::Offline)
                        .await;
                }
            }
        }

        if expired_total > 0 {
            tracing::info!(expired_devices = expired_total, "Heartbeat sweep completed");
        }
        Ok(expired_total)
    }

    /// Runs the sweep on a fixed interval until `shutdown` flips to true or
    /// its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_seconds = self.interval.as_secs(),
                timeout_seconds = self.timeout.num_seconds(),
                "Heartbeat monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep().await {
                            tracing::warn!(error = %err, "Heartbeat sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Heartbeat monitor stopped");
        })
    }
}
