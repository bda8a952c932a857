use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parley_backend::{
    models::presence::{PresenceRecord, PresenceStatus},
    repositories::presence_store::{InMemoryPresenceStore, PresenceStore},
    services::{
        heartbeat::{HeartbeatMonitor, PresenceNotifier},
        presence::PresenceTracker,
    },
    types::{ConnectionId, UserId},
};
use tokio::sync::watch;

mod support;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(UserId, PresenceStatus)>>,
}

#[async_trait]
impl PresenceNotifier for RecordingNotifier {
    async fn presence_changed(&self, user_id: UserId, status: PresenceStatus) {
        self.events
            .lock()
            .expect("lock events")
            .push((user_id, status));
    }
}

#[tokio::test]
async fn sweep_expires_only_silent_devices() {
    let store: Arc<dyn PresenceStore> = Arc::new(InMemoryPresenceStore::new(3600));
    let tracker = Arc::new(PresenceTracker::new(store.clone()));
    let monitor = HeartbeatMonitor::new(tracker.clone(), 10, 30);
    let user_id = UserId::new();
    let stale = ConnectionId::new();
    let fresh = ConnectionId::new();
    let now = Utc::now();

    let mut record = PresenceRecord::new(user_id, now);
    record.connect_device(stale, "web", now - Duration::seconds(40));
    record.connect_device(fresh, "mobile", now - Duration::seconds(5));
    store.save(&record).await.unwrap();

    let expired = monitor.sweep_at(now).await.expect("sweep");

    assert_eq!(expired, 1);
    let record = tracker.get_presence(user_id).await.unwrap().unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
    let device = |connection_id: ConnectionId| {
        record
            .devices
            .iter()
            .find(|device| device.connection_id == connection_id)
            .expect("device")
            .status
    };
    assert_eq!(device(stale), PresenceStatus::Offline);
    assert_eq!(device(fresh), PresenceStatus::Online);
}

#[tokio::test]
async fn sweep_leaves_recent_devices_and_aggregate_online() {
    let tracker = support::in_memory_tracker();
    let monitor = HeartbeatMonitor::new(tracker.clone(), 10, 30);
    let user_id = UserId::new();
    let web = ConnectionId::new();
    tracker.set_online(user_id, web, "web").await.unwrap();

    let expired = monitor
        .sweep_at(Utc::now() + Duration::seconds(5))
        .await
        .expect("sweep");

    assert_eq!(expired, 0);
    let record = tracker.get_presence(user_id).await.unwrap().unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
}

#[tokio::test]
async fn sweep_takes_timed_out_user_offline_and_notifies() {
    let tracker = support::in_memory_tracker();
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor =
        HeartbeatMonitor::new(tracker.clone(), 10, 30).with_notifier(notifier.clone());
    let silent_user = UserId::new();
    let other_user = UserId::new();
    tracker
        .set_online(silent_user, ConnectionId::new(), "web")
        .await
        .unwrap();

    let expired = monitor
        .sweep_at(Utc::now() + Duration::seconds(31))
        .await
        .expect("sweep");
    tracker
        .set_online(other_user, ConnectionId::new(), "web")
        .await
        .unwrap();

    assert_eq!(expired, 1);
    let record = tracker.get_presence(silent_user).await.unwrap().unwrap();
    assert_eq!(record.status, PresenceStatus::Offline);
    assert!(record.devices.iter().all(|device| !device.is_online()));
    assert_eq!(
        notifier.events.lock().unwrap().as_slice(),
        &[(silent_user, PresenceStatus::Offline)]
    );
    let other = tracker.get_presence(other_user).await.unwrap().unwrap();
    assert_eq!(other.status, PresenceStatus::Online);
}

#[tokio::test]
async fn sweep_and_disconnect_converge() {
    let tracker = support::in_memory_tracker();
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor =
        HeartbeatMonitor::new(tracker.clone(), 10, 30).with_notifier(notifier.clone());
    let user_id = UserId::new();
    let connection_id = ConnectionId::new();
    tracker
        .set_online(user_id, connection_id, "web")
        .await
        .unwrap();

    tracker.set_offline(user_id, connection_id).await.unwrap();
    let expired = monitor
        .sweep_at(Utc::now() + Duration::seconds(60))
        .await
        .expect("sweep");

    assert_eq!(expired, 0);
    assert!(notifier.events.lock().unwrap().is_empty());
    let record = tracker.get_presence(user_id).await.unwrap().unwrap();
    assert_eq!(record.status, PresenceStatus::Offline);
}

#[tokio::test]
async fn heartbeat_after_timeout_brings_open_connection_back_online() {
    let tracker = support::in_memory_tracker();
    let monitor = HeartbeatMonitor::new(tracker.clone(), 10, 30);
    let user_id = UserId::new();
    let connection_id = ConnectionId::new();
    tracker
        .set_online(user_id, connection_id, "web")
        .await
        .unwrap();
    monitor
        .sweep_at(Utc::now() + Duration::seconds(31))
        .await
        .expect("sweep");

    let outcome = tracker.heartbeat(user_id, connection_id).await.unwrap();

    assert!(outcome.found);
    assert!(outcome.came_online);
    let record = tracker.get_presence(user_id).await.unwrap().unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
    assert_eq!(record.online_device_count(), 1);

    let outcome = tracker.heartbeat(user_id, connection_id).await.unwrap();
    assert!(outcome.found);
    assert!(!outcome.came_online);
}

#[tokio::test]
async fn spawned_monitor_stops_on_shutdown() {
    let tracker = support::in_memory_tracker();
    let monitor = Arc::new(HeartbeatMonitor::new(tracker, 1, 30));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = monitor.spawn(shutdown_rx);
    shutdown_tx.send(true).expect("send shutdown");

    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("monitor stopped in time")
        .expect("monitor task");
}
