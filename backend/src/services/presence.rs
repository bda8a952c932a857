//! Multi-device presence tracking on top of a [`PresenceStore`].
//!
//! Every operation is a read-merge-write of the user's whole document. Those
//! cycles are serialized per user through an async lock so that two devices
//! of the same user never overwrite each other's update.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::presence::PresenceRecord;
use crate::repositories::presence_store::{PresenceStore, PresenceStoreError};
use crate::types::{ConnectionId, ConversationId, UserId};

/// Outcome of expiring stale devices for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryOutcome {
    pub expired_devices: usize,
    /// The user had an online device before the sweep and none after it.
    pub went_offline: bool,
}

/// Outcome of a heartbeat from one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// A device is on record for the connection.
    pub found: bool,
    /// The user was offline before the heartbeat and online after it.
    pub came_online: bool,
}

pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

struct UserLock<'a> {
    locks: &'a DashMap<UserId, Arc<Mutex<()>>>,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means nobody is queued.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    async fn lock_user(&self, user_id: UserId) -> UserLock<'_> {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        UserLock {
            locks: &self.locks,
            user_id,
            guard: Some(guard),
        }
    }

    /// Loads the record, applies `apply` and persists when it reports a change.
    /// Absent records are left alone.
    async fn mutate<F>(
        &self,
        user_id: UserId,
        apply: F,
    ) -> Result<Option<PresenceRecord>, PresenceStoreError>
    where
        F: FnOnce(&mut PresenceRecord) -> bool + Send,
    {
        let _lock = self.lock_user(user_id).await;
        let Some(mut record) = self.store.load(user_id).await? else {
            return Ok(None);
        };
        if apply(&mut record) {
            self.store.save(&record).await?;
        }
        Ok(Some(record))
    }

    pub async fn set_online(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        device_id: &str,
    ) -> Result<PresenceRecord, PresenceStoreError> {
        let _lock = self.lock_user(user_id).await;
        let now = Utc::now();
        let mut record = self
            .store
            .load(user_id)
            .await?
            .unwrap_or_else(|| PresenceRecord::new(user_id, now));
        record.connect_device(connection_id, device_id, now);
        self.store.save(&record).await?;

        tracing::debug!(
            %user_id,
            %connection_id,
            device_id,
            devices = record.devices.len(),
            "Device online"
        );
        Ok(record)
    }

    pub async fn set_offline(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Option<PresenceRecord>, PresenceStoreError> {
        let record = self
            .mutate(user_id, |record| record.disconnect(connection_id, Utc::now()))
            .await?;
        match &record {
            Some(record) => tracing::debug!(
                %user_id,
                %connection_id,
                status = record.status.as_str(),
                "Device offline"
            ),
            None => tracing::debug!(%user_id, %connection_id, "No presence record on disconnect"),
        }
        Ok(record)
    }

    /// Applies to every online device, since the event does not say which
    /// device opened the conversation.
    pub async fn set_active_chat(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
    ) -> Result<Option<PresenceRecord>, PresenceStoreError> {
        self.mutate(user_id, |record| {
            record.set_active_chat(conversation_id, Utc::now()) > 0
        })
        .await
    }

    /// Refreshes the device's heartbeat. A device the sweep expired while
    /// its connection stayed open is marked online again.
    pub async fn heartbeat(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<HeartbeatOutcome, PresenceStoreError> {
        let mut outcome = HeartbeatOutcome::default();
        self.mutate(user_id, |record| {
            let was_online = record.is_online();
            if record.heartbeat(connection_id, Utc::now()).is_none() {
                return false;
            }
            outcome.found = true;
            outcome.came_online = !was_online && record.is_online();
            true
        })
        .await?;
        Ok(outcome)
    }

    pub async fn get_presence(
        &self,
        user_id: UserId,
    ) -> Result<Option<PresenceRecord>, PresenceStoreError> {
        self.store.load(user_id).await
    }

    pub async fn has_active_chat_open(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<bool, PresenceStoreError> {
        Ok(self
            .store
            .load(user_id)
            .await?
            .map(|record| record.has_active_chat(conversation_id))
            .unwrap_or(false))
    }

    pub async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceStoreError> {
        self.store.tracked_users().await
    }

    /// Takes devices with a heartbeat older than `timeout` offline, under the
    /// same per-user lock as explicit disconnects.
    pub async fn expire_stale_devices(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<ExpiryOutcome, PresenceStoreError> {
        let mut outcome = ExpiryOutcome::default();
        self.mutate(user_id, |record| {
            let was_online = record.is_online();
            outcome.expired_devices = record.expire_stale_devices(now, timeout);
            outcome.went_offline = was_online && !record.is_online();
            outcome.expired_devices > 0
        })
        .await?;
        Ok(outcome)
    }
}
