use std::net::TcpListener;
use std::sync::Arc;

use testcontainers::{clients::Cli, core::WaitFor, GenericImage, RunnableImage};
use parley_backend::db::redis::create_redis_pool;
use parley_backend::models::presence::PresenceStatus;
use parley_backend::repositories::presence_store::{
    PresenceStore, PresenceStoreError, RedisPresenceStore,
};
use parley_backend::services::presence::PresenceTracker;
use parley_backend::types::{ConnectionId, UserId};

mod support;

fn allocate_ephemeral_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("read socket addr")
        .port()
}

#[tokio::test]
async fn presence_falls_back_to_memory_without_redis_url() {
    let config = support::test_config();
    let pool = create_redis_pool(&config).await.expect("create redis pool");
    assert!(pool.is_none());
}

#[tokio::test]
async fn unreachable_redis_surfaces_as_store_error() {
    let mut config = support::test_config();
    config.redis_url = Some("redis://127.0.0.1:1".to_string());
    config.redis_pool_size = 1;
    config.redis_connect_timeout = 1;
    let pool = create_redis_pool(&config)
        .await
        .expect("pool builder")
        .expect("pool configured");
    let tracker = PresenceTracker::new(Arc::new(RedisPresenceStore::new(pool, 60)));

    let result = tracker
        .set_online(UserId::new(), ConnectionId::new(), "web")
        .await;

    assert!(matches!(result, Err(PresenceStoreError::Unavailable(_))));
}

#[tokio::test]
async fn redis_presence_store_roundtrip() {
    let docker = Cli::default();
    let host_port = allocate_ephemeral_port();
    let image = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout(
            "Ready to accept connections",
        ));
    let image = RunnableImage::from(image).with_mapped_port((host_port, 6379));
    let _container = docker.run(image);

    let mut config = support::test_config();
    config.redis_url = Some(format!("redis://127.0.0.1:{host_port}"));
    config.redis_pool_size = 2;
    config.redis_connect_timeout = 5;

    let pool = create_redis_pool(&config)
        .await
        .expect("create redis pool")
        .expect("redis pool available");
    let store: Arc<dyn PresenceStore> = Arc::new(RedisPresenceStore::new(pool, 60));
    let tracker = PresenceTracker::new(store.clone());

    let user_id = UserId::new();
    assert!(store.load(user_id).await.expect("load").is_none());

    let web = ConnectionId::new();
    let mobile = ConnectionId::new();
    tracker
        .set_online(user_id, web, "web")
        .await
        .expect("set online web");
    tracker
        .set_online(user_id, mobile, "mobile")
        .await
        .expect("set online mobile");
    tracker
        .set_offline(user_id, web)
        .await
        .expect("set offline web");

    let record = store
        .load(user_id)
        .await
        .expect("load")
        .expect("record stored");
    assert_eq!(record.user_id, user_id);
    assert_eq!(record.status, PresenceStatus::Online);
    assert_eq!(record.devices.len(), 2);
    assert_eq!(record.online_device_count(), 1);

    let tracked = store.tracked_users().await.expect("tracked users");
    assert!(tracked.contains(&user_id));
}
