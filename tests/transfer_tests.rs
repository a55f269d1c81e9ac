use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use peer_drop::clock::ManualClock;
use peer_drop::identity::DeviceId;
use peer_drop::relay::{RelayError, UploadRelay, UploadTarget};
use peer_drop::store::{DocumentStore, LocalStore};
use peer_drop::transfer::{
    inbound_path, parse_inbound, transfer_path, InboundPhase, Observation, OutboundStatus,
    TransferCoordinator, TransferError, TransferStatus,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<LocalStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        Self {
            _dir: dir,
            store,
            clock,
        }
    }

    fn device(&self, id: &str) -> TransferCoordinator {
        TransferCoordinator::new(self.store.clone(), self.clock.clone(), DeviceId::new(id))
    }
}

// ============================================================================
// Sender-side state machine
// ============================================================================

#[test]
fn test_observation_from_snapshot() {
    assert_eq!(Observation::from_snapshot(None), Observation::Absent);
    assert_eq!(
        Observation::from_snapshot(Some(&json!({"status": "pending"}))),
        Observation::Present(TransferStatus::Pending)
    );
    assert_eq!(
        Observation::from_snapshot(Some(&json!({"status": "accepted", "x": 1}))),
        Observation::Present(TransferStatus::Accepted)
    );
    assert_eq!(
        Observation::from_snapshot(Some(&json!({"status": "weird"}))),
        Observation::Unrecognized
    );
    assert_eq!(
        Observation::from_snapshot(Some(&json!({"filename": "a"}))),
        Observation::Unrecognized
    );
}

#[test]
fn test_outbound_status_transitions() {
    use OutboundStatus::*;
    let pending = Observation::Present(TransferStatus::Pending);
    let accepted = Observation::Present(TransferStatus::Accepted);

    assert_eq!(Unobserved.observe(Observation::Absent), Unobserved);
    assert_eq!(Unobserved.observe(pending), Pending);
    assert_eq!(Unobserved.observe(accepted), Accepted);
    assert_eq!(Pending.observe(accepted), Accepted);
    assert_eq!(Pending.observe(Observation::Absent), Rejected);
    assert_eq!(Accepted.observe(Observation::Absent), Completed);
    assert_eq!(Pending.observe(Observation::Unrecognized), Pending);
}

#[test]
fn test_outbound_status_never_regresses() {
    use OutboundStatus::*;
    let pending = Observation::Present(TransferStatus::Pending);

    assert_eq!(Accepted.observe(pending), Accepted);
    for terminal in [Rejected, Completed] {
        assert!(terminal.is_terminal());
        assert_eq!(terminal.observe(pending), terminal);
        assert_eq!(terminal.observe(Observation::Absent), terminal);
    }
    assert!(!Accepted.is_terminal());
}

#[test]
fn test_parse_inbound_orders_and_skips_malformed() {
    let snapshot = json!({
        "k1": {"senderId": "a", "payloadUrl": "https://x/1", "filename": "1.png",
               "fileSizeBytes": 1, "status": "pending", "createdAt": 1000},
        "k2": {"senderId": "a", "payloadUrl": "https://x/2", "filename": "2.png",
               "fileSizeBytes": 2, "status": "accepted", "createdAt": 3000},
        "k3": {"status": "accepted"},
    });

    let inbound = parse_inbound(Some(&snapshot));
    let keys: Vec<&str> = inbound.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["k2", "k1"]);
    assert_eq!(inbound[0].phase(), InboundPhase::ReadyToDownload);
    assert_eq!(inbound[1].phase(), InboundPhase::AwaitingDecision);

    assert!(parse_inbound(None).is_empty());
}

// ============================================================================
// Coordinator
// ============================================================================

#[tokio::test]
async fn test_accept_then_complete() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    let mut inbound = bob.observe_inbound().await.unwrap();
    let mut outbound = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 42)
        .await
        .unwrap();
    assert_eq!(outbound.receiver(), bob.device_id());

    let status = tokio::time::timeout(WAIT, outbound.wait_for(|s| *s == OutboundStatus::Pending))
        .await
        .unwrap();
    assert_eq!(status, Some(OutboundStatus::Pending));

    let list = tokio::time::timeout(WAIT, inbound.wait_for(|l| l.len() == 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(list[0].key, outbound.key());
    assert_eq!(list[0].record.sender_id, DeviceId::new("alice"));
    assert_eq!(list[0].record.file_size_bytes, 42);
    assert_eq!(list[0].phase(), InboundPhase::AwaitingDecision);

    bob.accept(outbound.key()).await.unwrap();
    let status = tokio::time::timeout(WAIT, outbound.wait_for(|s| *s == OutboundStatus::Accepted))
        .await
        .unwrap();
    assert_eq!(status, Some(OutboundStatus::Accepted));
    let list = tokio::time::timeout(
        WAIT,
        inbound.wait_for(|l| l.first().is_some_and(|t| t.phase() == InboundPhase::ReadyToDownload)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(list[0].record.payload_url, "https://files.example/a.png");

    bob.mark_done(outbound.key()).await.unwrap();
    let status = tokio::time::timeout(WAIT, outbound.finished()).await.unwrap();
    assert_eq!(status, OutboundStatus::Completed);
    tokio::time::timeout(WAIT, inbound.wait_for(|l| l.is_empty()))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_reject_is_seen_as_rejection() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    let mut outbound = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 1)
        .await
        .unwrap();
    bob.reject(outbound.key()).await.unwrap();

    let status = tokio::time::timeout(WAIT, outbound.finished()).await.unwrap();
    assert_eq!(status, OutboundStatus::Rejected);
}

#[tokio::test]
async fn test_immediate_rejection_is_not_missed() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    // Delete straight from the store, before the sender's watcher has run
    let mut outbound = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 1)
        .await
        .unwrap();
    h.store
        .delete(&transfer_path(bob.device_id(), outbound.key()).unwrap())
        .await
        .unwrap();

    let status = tokio::time::timeout(WAIT, outbound.finished()).await.unwrap();
    assert_eq!(status, OutboundStatus::Rejected);
}

#[tokio::test]
async fn test_accept_vanished_transfer_fails_without_recreating() {
    let h = Harness::new();
    let bob = h.device("bob");

    let err = bob.accept("no-such-key").await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound { .. }));

    let path = transfer_path(bob.device_id(), "no-such-key").unwrap();
    assert_eq!(h.store.read(&path).await.unwrap(), None);
}

#[tokio::test]
async fn test_accept_is_idempotent_and_reject_absent_is_ok() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    let outbound = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 1)
        .await
        .unwrap();
    bob.accept(outbound.key()).await.unwrap();
    bob.accept(outbound.key()).await.unwrap();

    let path = transfer_path(bob.device_id(), outbound.key()).unwrap();
    let stored = h.store.read(&path).await.unwrap().unwrap();
    assert_eq!(stored["status"], "accepted");
    assert_eq!(stored["filename"], "a.png");

    bob.mark_done(outbound.key()).await.unwrap();
    bob.reject(outbound.key()).await.unwrap();
    bob.mark_done(outbound.key()).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_transfers_resolve_independently() {
    let h = Harness::new();
    let alice = h.device("alice");
    let carol = h.device("carol");
    let bob = h.device("bob");

    let mut from_alice = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 1)
        .await
        .unwrap();
    let mut from_carol = carol
        .initiate(bob.device_id(), "https://files.example/c.png", "c.png", 2)
        .await
        .unwrap();
    assert_ne!(from_alice.key(), from_carol.key());

    bob.accept(from_carol.key()).await.unwrap();
    bob.reject(from_alice.key()).await.unwrap();

    assert_eq!(
        tokio::time::timeout(WAIT, from_alice.finished()).await.unwrap(),
        OutboundStatus::Rejected
    );
    let status = tokio::time::timeout(WAIT, from_carol.wait_for(|s| *s == OutboundStatus::Accepted))
        .await
        .unwrap();
    assert_eq!(status, Some(OutboundStatus::Accepted));

    let remaining = h
        .store
        .read(&inbound_path(bob.device_id()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_observation_keeps_last_status() {
    let h = Harness::new();
    let alice = h.device("alice");
    let bob = h.device("bob");

    let mut outbound = alice
        .initiate(bob.device_id(), "https://files.example/a.png", "a.png", 1)
        .await
        .unwrap();
    tokio::time::timeout(WAIT, outbound.wait_for(|s| *s == OutboundStatus::Pending))
        .await
        .unwrap();
    outbound.cancel();

    bob.reject(outbound.key()).await.unwrap();
    let status = tokio::time::timeout(WAIT, outbound.finished()).await.unwrap();
    assert_eq!(status, OutboundStatus::Pending);
}

// ============================================================================
// Sending through the relay
// ============================================================================

struct FixedTarget(Option<&'static str>);

#[async_trait]
impl UploadTarget for FixedTarget {
    fn name(&self) -> &str {
        "Fixed"
    }

    fn allowed_extensions(&self) -> &[String] {
        &[]
    }

    async fn upload(&self, _filename: &str, _data: Bytes) -> Result<String, RelayError> {
        self.0.map(str::to_string).ok_or_else(|| RelayError::InvalidResponse {
            service: "Fixed".to_string(),
            body: "nope".to_string(),
        })
    }
}

#[tokio::test]
async fn test_send_file_uses_relay_url() {
    let h = Harness::new();
    let alice = h.device("alice");
    let relay = UploadRelay::new(vec![
        Arc::new(FixedTarget(None)),
        Arc::new(FixedTarget(Some("https://relay.example/f.bin"))),
    ]);

    let outbound = alice
        .send_file(&relay, &DeviceId::new("bob"), "f.bin", Bytes::from_static(b"12345"))
        .await
        .unwrap();

    let path = transfer_path(&DeviceId::new("bob"), outbound.key()).unwrap();
    let stored = h.store.read(&path).await.unwrap().unwrap();
    assert_eq!(stored["payloadUrl"], "https://relay.example/f.bin");
    assert_eq!(stored["fileSizeBytes"], 5);
    assert_eq!(stored["status"], "pending");
}

#[tokio::test]
async fn test_send_file_total_failure_writes_nothing() {
    let h = Harness::new();
    let alice = h.device("alice");
    let relay = UploadRelay::new(vec![Arc::new(FixedTarget(None))]);

    let err = alice
        .send_file(&relay, &DeviceId::new("bob"), "f.bin", Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Relay(RelayError::AllTargetsFailed(_))
    ));

    let inbound = h
        .store
        .read(&inbound_path(&DeviceId::new("bob")).unwrap())
        .await
        .unwrap();
    assert_eq!(inbound, None);
}
