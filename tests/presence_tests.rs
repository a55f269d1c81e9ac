use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use peer_drop::clock::{Clock, ManualClock};
use peer_drop::config::PresenceConfig;
use peer_drop::identity::{DeviceId, IdentityProvider};
use peer_drop::presence::{
    effectively_online, online_peers, presence_path, PeerLookup, PresenceError, PresenceManager,
    PresenceRecord,
};
use peer_drop::store::{DocumentStore, LocalStore};
use serde_json::json;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<LocalStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("store")).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        Self {
            _dir: dir,
            store,
            clock,
        }
    }

    /// A device with its own identity directory, sharing the store and clock.
    fn device(&self, name: &str) -> PresenceManager {
        let identity = IdentityProvider::new(self._dir.path().join("devices").join(name));
        PresenceManager::new(
            self.store.clone(),
            self.clock.clone(),
            identity,
            PresenceConfig::default(),
        )
        .unwrap()
    }

    async fn record(&self, id: &DeviceId) -> Option<PresenceRecord> {
        let snapshot = self.store.read(&presence_path(id).unwrap()).await.unwrap();
        snapshot.as_ref().and_then(PresenceRecord::from_snapshot)
    }
}

fn record(online: bool, last_seen_secs_ago: i64) -> PresenceRecord {
    PresenceRecord {
        display_name: "Phone".to_string(),
        is_online: online,
        last_seen_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            - chrono::Duration::seconds(last_seen_secs_ago),
    }
}

// ============================================================================
// Liveness
// ============================================================================

#[test]
fn test_effectively_online() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let threshold = Duration::from_secs(60);

    assert!(effectively_online(&record(true, 0), now, threshold));
    assert!(effectively_online(&record(true, 59), now, threshold));
    assert!(!effectively_online(&record(true, 60), now, threshold));
    assert!(!effectively_online(&record(false, 0), now, threshold));
    // Sender's clock ahead of ours
    assert!(effectively_online(&record(true, -30), now, threshold));
}

#[test]
fn test_online_peers_filters_and_sorts() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let ts = |secs_ago: i64| (now - chrono::Duration::seconds(secs_ago)).timestamp_millis();
    let snapshot = json!({
        "me": {"displayName": "Me", "isOnline": true, "lastSeenAt": ts(0)},
        "b": {"displayName": "Zed", "isOnline": true, "lastSeenAt": ts(5)},
        "a": {"displayName": "Amy", "isOnline": true, "lastSeenAt": ts(10)},
        "stale": {"displayName": "Old", "isOnline": true, "lastSeenAt": ts(600)},
        "off": {"displayName": "Off", "isOnline": false, "lastSeenAt": ts(0)},
        "partial": {"isOnline": true},
    });

    let peers = online_peers(
        Some(&snapshot),
        now,
        Duration::from_secs(60),
        Some(&DeviceId::new("me")),
    );
    let names: Vec<&str> = peers.iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, vec!["Amy", "Zed"]);
    assert_eq!(peers[0].id, DeviceId::new("a"));

    assert!(online_peers(None, now, Duration::from_secs(60), None).is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_registered_device_is_not_listed_until_online() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    alice.register("Alice").await.unwrap();
    let stored = h.record(alice.device_id()).await.unwrap();
    assert_eq!(stored.display_name, "Alice");
    assert!(!stored.is_online);
    assert!(bob.peers_now().await.unwrap().is_empty());

    alice.go_online().await.unwrap();
    let peers = bob.peers_now().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(&peers[0].id, alice.device_id());

    // Never listed to itself
    assert!(alice.peers_now().await.unwrap().is_empty());

    alice.go_offline().await;
    assert!(bob.peers_now().await.unwrap().is_empty());
    let stored = h.record(alice.device_id()).await.unwrap();
    assert!(!stored.is_online);
    assert!(!alice.is_heartbeating().await);
}

#[tokio::test]
async fn test_go_online_requires_registration() {
    let h = Harness::new();
    let alice = h.device("alice");

    let err = alice.go_online().await.unwrap_err();
    assert!(matches!(err, PresenceError::NotRegistered(_)));
    assert!(h.record(alice.device_id()).await.is_none());
    assert!(!alice.is_heartbeating().await);
}

#[tokio::test]
async fn test_register_with_empty_name_writes_nothing() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.register("   ").await.unwrap();
    assert!(h.record(alice.device_id()).await.is_none());
}

#[tokio::test]
async fn test_go_offline_without_record_creates_nothing() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.go_offline().await;
    assert!(h.record(alice.device_id()).await.is_none());
}

#[tokio::test]
async fn test_crashed_device_goes_stale() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    // Simulate a crash: the heartbeat dies without going offline
    drop(alice);

    assert_eq!(bob.peers_now().await.unwrap().len(), 1);
    h.clock.advance(Duration::from_secs(61));
    assert!(bob.peers_now().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_peer_by_id() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    assert_eq!(
        bob.find_peer_by_id(alice.device_id()).await.unwrap(),
        PeerLookup::NotFound
    );

    alice.register("Alice").await.unwrap();
    assert!(matches!(
        bob.find_peer_by_id(alice.device_id()).await.unwrap(),
        PeerLookup::Offline(_)
    ));

    alice.go_online().await.unwrap();
    match bob.find_peer_by_id(alice.device_id()).await.unwrap() {
        PeerLookup::Online(record) => assert_eq!(record.display_name, "Alice"),
        other => panic!("expected online, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unregister_forgets_identity() {
    let h = Harness::new();
    let alice = h.device("alice");
    let id = alice.device_id().clone();

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    alice.unregister().await.unwrap();

    assert!(h.record(&id).await.is_none());

    let again = h.device("alice");
    assert_ne!(again.device_id(), &id);
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let h = Harness::new();
    let first = h.device("alice").device_id().clone();
    let second = h.device("alice").device_id().clone();
    assert_eq!(first, second);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_refreshes_last_seen() {
    let h = Harness::new();
    let alice = h.device("alice");
    let start = h.clock.now();

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    assert!(alice.is_heartbeating().await);

    h.clock.advance(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(31)).await;

    let stored = h.record(alice.device_id()).await.unwrap();
    assert!(stored.is_online);
    assert_eq!(stored.last_seen_at, start + chrono::Duration::seconds(30));
}

#[tokio::test(start_paused = true)]
async fn test_go_online_twice_is_idempotent() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    let first = h.record(alice.device_id()).await.unwrap();

    h.clock.advance(Duration::from_secs(5));
    alice.go_online().await.unwrap();
    let second = h.record(alice.device_id()).await.unwrap();

    assert_eq!(second.display_name, first.display_name);
    assert!(second.is_online);
    assert_eq!(second.last_seen_at, first.last_seen_at + chrono::Duration::seconds(5));
    let raw = h
        .store
        .read(&presence_path(alice.device_id()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.as_object().unwrap().len(), 3);
    assert!(alice.is_heartbeating().await);

    // A single heartbeat task: one stop silences every write
    alice.go_offline().await;
    let offline = h.record(alice.device_id()).await.unwrap();
    h.clock.advance(Duration::from_secs(100));
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(h.record(alice.device_id()).await.unwrap(), offline);
    assert!(!offline.is_online);
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeat_after_go_offline() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    alice.go_offline().await;
    let offline_at = h.record(alice.device_id()).await.unwrap();

    h.clock.advance(Duration::from_secs(300));
    tokio::time::sleep(Duration::from_secs(300)).await;

    let stored = h.record(alice.device_id()).await.unwrap();
    assert_eq!(stored, offline_at);
    assert!(!stored.is_online);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_when_record_deleted() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    h.store
        .delete(&presence_path(alice.device_id()).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    assert!(!alice.is_heartbeating().await);
    assert!(h.record(alice.device_id()).await.is_none());
    assert!(!alice.heartbeat().await);
}

#[tokio::test(start_paused = true)]
async fn test_reregister_stops_heartbeat() {
    let h = Harness::new();
    let alice = h.device("alice");

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    alice.register("Alice's Laptop").await.unwrap();
    assert!(!alice.is_heartbeating().await);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let stored = h.record(alice.device_id()).await.unwrap();
    assert_eq!(stored.display_name, "Alice's Laptop");
    assert!(!stored.is_online);
}

// ============================================================================
// Peer watch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_peer_watch_follows_presence() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    let mut watch = bob.list_online_peers().await.unwrap();

    alice.register("Alice").await.unwrap();
    alice.go_online().await.unwrap();
    let peers = tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|p| p.len() == 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(peers[0].display_name, "Alice");

    alice.go_offline().await;
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|p| p.is_empty()))
        .await
        .unwrap()
        .unwrap();

    watch.cancel();
    assert!(watch.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_peer_watch_drops_silent_peers() {
    let h = Harness::new();
    let bob = h.device("bob");

    // A device that went online and then vanished without a heartbeat
    let ghost = PresenceRecord {
        display_name: "Ghost".to_string(),
        is_online: true,
        last_seen_at: h.clock.now(),
    };
    h.store
        .write(
            &presence_path(&DeviceId::new("ghost")).unwrap(),
            serde_json::to_value(&ghost).unwrap(),
        )
        .await
        .unwrap();

    let mut watch = bob.list_online_peers().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|p| p.len() == 1))
        .await
        .unwrap()
        .unwrap();

    // No store change at all: only the periodic re-check can notice
    h.clock.advance(Duration::from_secs(61));
    tokio::time::timeout(Duration::from_secs(60), watch.wait_for(|p| p.is_empty()))
        .await
        .unwrap()
        .unwrap();
}
