use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::message::UserProfile;
use crate::types::UserId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactRepositoryTrait: Send + Sync {
    /// Users that should hear about `user_id` going online or offline.
    async fn contact_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AppError>;

    async fn find_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, AppError>;
}

#[derive(Debug, Clone)]
pub struct ContactRepository {
    pool: PgPool,
}

impl ContactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepositoryTrait for ContactRepository {
    async fn contact_ids(&self, user_id: UserId) -> Result<Vec<UserId>, AppError> {
        // Contacts are stored one-directionally; either side being listed counts.
        let ids = sqlx::query_scalar::<_, UserId>(
            r#"
            SELECT contact_id FROM contacts WHERE user_id = $1
            UNION
            SELECT user_id FROM contacts WHERE contact_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, AppError> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT id, username, display_name, avatar_url FROM user_profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}
