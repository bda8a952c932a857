use crate::config::Config;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;

pub type RedisPool = Pool<RedisConnectionManager>;

/// Builds the pool backing the presence store. `None` means no Redis URL is
/// configured and presence falls back to process memory.
pub async fn create_redis_pool(config: &Config) -> anyhow::Result<Option<RedisPool>> {
    let Some(url) = &config.redis_url else {
        tracing::info!("Redis URL not set, presence is kept in process memory");
        return Ok(None);
    };

    let manager = RedisConnectionManager::new(url.clone())?;
    let pool = Pool::builder()
        .max_size(config.redis_pool_size.max(1))
        .connection_timeout(Duration::from_secs(config.redis_connect_timeout.max(1)))
        .build(manager)
        .await?;

    tracing::info!(
        pool_size = config.redis_pool_size,
        "Redis presence pool created"
    );
    Ok(Some(pool))
}
