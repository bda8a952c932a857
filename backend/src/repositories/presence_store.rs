//! Keyed storage of per-user presence documents with sliding expiry.
//!
//! Each user owns exactly one document under [`presence_key`]. Writes always
//! replace the whole document and refresh its time-to-live; callers are
//! responsible for serializing read-merge-write cycles per user.

use async_trait::async_trait;
use bb8_redis::redis::{self, AsyncCommands};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::db::redis::RedisPool;
use crate::models::presence::PresenceRecord;
use crate::types::UserId;

const KEY_PREFIX: &str = "presence:";

/// Storage key for a user's presence document.
pub fn presence_key(user_id: UserId) -> String {
    format!("{}{}", KEY_PREFIX, user_id)
}

#[derive(Debug, thiserror::Error)]
pub enum PresenceStoreError {
    #[error("presence backend unavailable: {0}")]
    Unavailable(String),
    #[error("presence backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("corrupt presence document for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode presence document: {0}")]
    Encode(#[source] serde_json::Error),
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<PresenceRecord>, PresenceStoreError>;

    /// Replaces the user's document and restarts its expiry window.
    async fn save(&self, record: &PresenceRecord) -> Result<(), PresenceStoreError>;

    /// Users that currently have an unexpired document.
    async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceStoreError>;
}

pub struct RedisPresenceStore {
    pool: RedisPool,
    ttl_seconds: u64,
}

impl RedisPresenceStore {
    pub fn new(pool: RedisPool, ttl_seconds: u64) -> Self {
        Self { pool, ttl_seconds }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>, PresenceStoreError>
    {
        self.pool
            .get()
            .await
            .map_err(|err| PresenceStoreError::Unavailable(err.to_string()))
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn load(&self, user_id: UserId) -> Result<Option<PresenceRecord>, PresenceStoreError> {
        let span = tracing::debug_span!("redis_presence_load", %user_id);
        let _enter = span.enter();

        let key = presence_key(user_id);
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| PresenceStoreError::Corrupt {
                key: key.clone(),
                source,
            })
        })
        .transpose()
    }

    async fn save(&self, record: &PresenceRecord) -> Result<(), PresenceStoreError> {
        let span = tracing::debug_span!("redis_presence_save", user_id = %record.user_id);
        let _enter = span.enter();

        let json = serde_json::to_string(record).map_err(PresenceStoreError::Encode)?;
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(presence_key(record.user_id), json, self.ttl_seconds)
            .await?;
        Ok(())
    }

    async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceStoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", KEY_PREFIX);
        let mut keys = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX))
            .filter_map(|raw| match raw.parse::<UserId>() {
                Ok(user_id) => Some(user_id),
                Err(_) => {
                    tracing::warn!(key = raw, "Skipping presence key with malformed user id");
                    None
                }
            })
            .collect())
    }
}

struct StoredPresence {
    record: PresenceRecord,
    expires_at: DateTime<Utc>,
}

/// Process-local store used when Redis is not configured.
pub struct InMemoryPresenceStore {
    entries: DashMap<String, StoredPresence>,
    ttl: Duration,
}

impl InMemoryPresenceStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 1000)),
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, stored| stored.expires_at > now);
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn load(&self, user_id: UserId) -> Result<Option<PresenceRecord>, PresenceStoreError> {
        let now = Utc::now();
        let key = presence_key(user_id);
        let record = self
            .entries
            .get(&key)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.record.clone());
        if record.is_none() {
            self.entries.remove_if(&key, |_, stored| stored.expires_at <= now);
        }
        Ok(record)
    }

    async fn save(&self, record: &PresenceRecord) -> Result<(), PresenceStoreError> {
        self.entries.insert(
            presence_key(record.user_id),
            StoredPresence {
                record: record.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceStoreError> {
        self.purge_expired(Utc::now());
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().record.user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionId;

    #[test]
    fn key_is_derived_from_user_id_only() {
        let user_id = UserId::new();
        assert_eq!(presence_key(user_id), format!("presence:{}", user_id));
        assert_eq!(presence_key(user_id), presence_key(user_id));
        assert_ne!(presence_key(user_id), presence_key(UserId::new()));
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_and_lists_users() {
        let store = InMemoryPresenceStore::new(60);
        let user_id = UserId::new();
        let mut record = PresenceRecord::new(user_id, Utc::now());
        record.connect_device(ConnectionId::new(), "web", Utc::now());

        store.save(&record).await.expect("save");

        assert_eq!(store.load(user_id).await.expect("load"), Some(record));
        assert_eq!(store.tracked_users().await.expect("list"), vec![user_id]);
        assert_eq!(store.load(UserId::new()).await.expect("load"), None);
    }

    #[tokio::test]
    async fn in_memory_store_expires_documents() {
        let store = InMemoryPresenceStore::new(60);
        let user_id = UserId::new();
        store
            .entries
            .insert(
                presence_key(user_id),
                StoredPresence {
                    record: PresenceRecord::new(user_id, Utc::now()),
                    expires_at: Utc::now() - Duration::seconds(1),
                },
            );

        assert_eq!(store.load(user_id).await.expect("load"), None);
        assert!(store.tracked_users().await.expect("list").is_empty());
    }
}
