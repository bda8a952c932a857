use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_backend::{
    app,
    config::Config,
    db::{
        connection::{create_pool, run_migrations, DbPool},
        redis::create_redis_pool,
    },
    realtime::hub::RealtimeHub,
    repositories::{
        contact::ContactRepository,
        conversation::{ConversationRepository, ConversationRepositoryTrait},
        message_status::MessageStatusRepository,
        presence_store::{InMemoryPresenceStore, PresenceStore, RedisPresenceStore},
        privacy::PrivacySettingsRepository,
    },
    services::{
        heartbeat::HeartbeatMonitor, message_status::MessageStatusService,
        presence::PresenceTracker,
    },
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        jwt_secret = %mask_secret(&config.jwt_secret),
        redis_enabled = config.redis_url.is_some(),
        presence_ttl_seconds = config.presence_ttl_seconds,
        heartbeat_interval_seconds = config.heartbeat_interval_seconds,
        heartbeat_timeout_seconds = config.heartbeat_timeout_seconds,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool: DbPool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let presence_store: Arc<dyn PresenceStore> = match create_redis_pool(&config).await? {
        Some(redis) => Arc::new(RedisPresenceStore::new(redis, config.presence_ttl_seconds)),
        None => Arc::new(InMemoryPresenceStore::new(config.presence_ttl_seconds)),
    };

    let conversations: Arc<dyn ConversationRepositoryTrait> =
        Arc::new(ConversationRepository::new(pool.clone()));
    let tracker = Arc::new(PresenceTracker::new(presence_store));
    let message_status = Arc::new(MessageStatusService::new(
        Arc::new(MessageStatusRepository::new(pool.clone())),
        conversations.clone(),
        Arc::new(PrivacySettingsRepository::new(pool.clone())),
    ));
    let hub = Arc::new(RealtimeHub::new(
        tracker.clone(),
        message_status.clone(),
        conversations.clone(),
        Arc::new(ContactRepository::new(pool)),
        config.session_queue_capacity,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Arc::new(
        HeartbeatMonitor::new(
            tracker.clone(),
            config.heartbeat_interval_seconds,
            config.heartbeat_timeout_seconds,
        )
        .with_notifier(hub.clone()),
    );
    let monitor_task = monitor.spawn(shutdown_rx);

    let addr = config.bind_addr;
    let state = AppState::new(config, tracker, message_status, conversations, hub);
    let app = app::router(state);

    // Start server
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = monitor_task.await {
        tracing::warn!(error = %err, "Heartbeat monitor task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
