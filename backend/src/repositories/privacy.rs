//! Per-user privacy preferences consulted before exposing read receipts.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::types::UserId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrivacySettingsTrait: Send + Sync {
    /// Defaults to `true` when the user has no settings row or the lookup fails.
    async fn read_receipts_enabled(&self, user_id: UserId) -> bool;
}

#[derive(Debug, Clone)]
pub struct PrivacySettingsRepository {
    pool: PgPool,
}

impl PrivacySettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrivacySettingsTrait for PrivacySettingsRepository {
    async fn read_receipts_enabled(&self, user_id: UserId) -> bool {
        let result = sqlx::query_scalar::<_, bool>(
            "SELECT read_receipts_enabled FROM privacy_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(setting) => setting.unwrap_or(true),
            Err(err) => {
                tracing::warn!(
                    error = ?err,
                    %user_id,
                    "Failed to load privacy settings, assuming read receipts enabled"
                );
                true
            }
        }
    }
}
