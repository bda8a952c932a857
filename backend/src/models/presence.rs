//! Multi-device presence documents stored per user.
//!
//! A [`PresenceRecord`] is persisted as one JSON document per user. All device
//! transitions are methods on the record so the tracker and the heartbeat
//! sweep apply identical semantics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{ConnectionId, ConversationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[schema(value_type = String)]
    pub connection_id: ConnectionId,
    pub device_id: String,
    pub status: PresenceStatus,
    #[schema(value_type = Option<String>)]
    pub active_chat_id: Option<ConversationId>,
    pub last_heartbeat: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }

    fn go_offline(&mut self) {
        self.status = PresenceStatus::Offline;
        self.active_chat_id = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    #[schema(value_type = String)]
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    pub devices: Vec<DeviceRecord>,
}

impl PresenceRecord {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: now,
            devices: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }

    /// Registers `device_id` as online on `connection_id`, replacing any
    /// previous entry for the same device in place.
    pub fn connect_device(
        &mut self,
        connection_id: ConnectionId,
        device_id: &str,
        now: DateTime<Utc>,
    ) {
        let device = DeviceRecord {
            connection_id,
            device_id: device_id.to_string(),
            status: PresenceStatus::Online,
            active_chat_id: None,
            last_heartbeat: now,
        };
        match self
            .devices
            .iter_mut()
            .find(|existing| existing.device_id == device_id)
        {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
        self.last_seen = now;
        self.recompute_status();
    }

    /// Marks the device bound to `connection_id` offline. A stale connection
    /// id (the device has since reconnected) matches nothing.
    ///
    /// Returns true when the record changed.
    pub fn disconnect(&mut self, connection_id: ConnectionId, now: DateTime<Utc>) -> bool {
        let Some(device) = self
            .devices
            .iter_mut()
            .find(|device| device.connection_id == connection_id)
        else {
            return false;
        };
        let was_online = device.is_online();
        device.go_offline();
        self.last_seen = now;
        self.recompute_status();
        was_online
    }

    /// Sets the open conversation on every online device.
    ///
    /// Returns the number of devices updated.
    pub fn set_active_chat(
        &mut self,
        conversation_id: Option<ConversationId>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut touched = 0;
        for device in self.devices.iter_mut().filter(|device| device.is_online()) {
            device.active_chat_id = conversation_id;
            touched += 1;
        }
        if touched > 0 {
            self.last_seen = now;
        }
        touched
    }

    /// Refreshes the device bound to `connection_id`. A device the sweep took
    /// offline while its connection stayed open is brought back online.
    ///
    /// Returns `None` when no device matches, otherwise whether the device
    /// came back online.
    pub fn heartbeat(&mut self, connection_id: ConnectionId, now: DateTime<Utc>) -> Option<bool> {
        let device = self
            .devices
            .iter_mut()
            .find(|device| device.connection_id == connection_id)?;
        device.last_heartbeat = now;
        let revived = !device.is_online();
        device.status = PresenceStatus::Online;
        self.last_seen = now;
        if revived {
            self.recompute_status();
        }
        Some(revived)
    }

    /// Takes every online device whose last heartbeat is older than `timeout`
    /// offline. Returns the number of devices transitioned.
    pub fn expire_stale_devices(&mut self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut expired = 0;
        for device in self.devices.iter_mut().filter(|device| device.is_online()) {
            if now.signed_duration_since(device.last_heartbeat) > timeout {
                device.go_offline();
                expired += 1;
            }
        }
        if expired > 0 {
            self.recompute_status();
        }
        expired
    }

    pub fn has_active_chat(&self, conversation_id: ConversationId) -> bool {
        self.devices
            .iter()
            .any(|device| device.is_online() && device.active_chat_id == Some(conversation_id))
    }

    pub fn online_device_count(&self) -> usize {
        self.devices.iter().filter(|device| device.is_online()).count()
    }

    fn recompute_status(&mut self) {
        self.status = if self.devices.iter().any(DeviceRecord::is_online) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        };
    }
}
