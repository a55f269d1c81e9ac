//! Device presence: who is registered, who is effectively online.
//!
//! Liveness is derived, never stored: a record is effectively online only
//! while its `isOnline` flag is set AND its `lastSeenAt` is younger than the
//! stale threshold, as judged by the observer's clock.

mod manager;

pub use manager::{PeerWatch, PresenceManager};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::{DeviceId, IdentityError};
use crate::store::{DocPath, DocumentStore, StoreError};

/// Root of the presence set in the document tree.
pub const PRESENCE_ROOT: &str = "presence";

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Device {0} is not registered")]
    NotRegistered(DeviceId),
}

/// A device's self-reported visibility entry, stored at `presence/{deviceId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub display_name: String,
    pub is_online: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Parse a stored snapshot; partial or foreign records yield `None`.
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// An effectively online device as seen by some observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: DeviceId,
    pub display_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen_at: DateTime<Utc>,
}

/// Result of addressing a device directly by identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerLookup {
    NotFound,
    /// Registered, but not effectively online
    Offline(PresenceRecord),
    Online(PresenceRecord),
}

/// `isOnline && (now - lastSeenAt) < threshold`.
///
/// A `lastSeenAt` ahead of `now` (skewed clocks) counts as fresh.
pub fn effectively_online(record: &PresenceRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    if !record.is_online {
        return false;
    }
    match now.signed_duration_since(record.last_seen_at).to_std() {
        Ok(elapsed) => elapsed < threshold,
        Err(_) => true,
    }
}

/// Every effectively online device in a snapshot of the presence set,
/// except `exclude`, ordered by display name.
///
/// This walks the whole set, so it is O(registered devices) on every
/// change anywhere in it. Fine for small deployments; the first thing to
/// replace if the presence set grows large.
pub fn online_peers(
    snapshot: Option<&Value>,
    now: DateTime<Utc>,
    threshold: Duration,
    exclude: Option<&DeviceId>,
) -> Vec<Peer> {
    let Some(Value::Object(records)) = snapshot else {
        return Vec::new();
    };

    let mut peers: Vec<Peer> = records
        .iter()
        .filter(|(id, _)| exclude.map_or(true, |own| own.as_str() != id.as_str()))
        .filter_map(|(id, value)| {
            let record = PresenceRecord::from_snapshot(value)?;
            effectively_online(&record, now, threshold).then(|| Peer {
                id: DeviceId::new(id.as_str()),
                display_name: record.display_name,
                last_seen_at: record.last_seen_at,
            })
        })
        .collect();

    peers.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.id.cmp(&b.id))
    });
    peers
}

pub fn presence_path(id: &DeviceId) -> Result<DocPath, StoreError> {
    DocPath::root(PRESENCE_ROOT)?.child(id.as_str())
}

/// Point read of one device's presence.
pub async fn find_peer(
    store: &dyn DocumentStore,
    id: &DeviceId,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Result<PeerLookup, PresenceError> {
    let snapshot = store.read(&presence_path(id)?).await?;
    let Some(record) = snapshot.as_ref().and_then(PresenceRecord::from_snapshot) else {
        return Ok(PeerLookup::NotFound);
    };

    if effectively_online(&record, now, threshold) {
        Ok(PeerLookup::Online(record))
    } else {
        Ok(PeerLookup::Offline(record))
    }
}

/// Clear a device's `isOnline` flag if it is registered.
///
/// Returns whether a record existed. Never creates a record.
pub async fn mark_offline(store: &dyn DocumentStore, id: &DeviceId) -> Result<bool, PresenceError> {
    let path = presence_path(id)?;
    if store.read(&path).await?.is_none() {
        return Ok(false);
    }

    let mut partial = Map::new();
    partial.insert("isOnline".to_string(), Value::Bool(false));
    store.merge(&path, partial).await?;
    Ok(true)
}

fn online_fields(now: DateTime<Utc>) -> Map<String, Value> {
    let mut partial = last_seen_fields(now);
    partial.insert("isOnline".to_string(), Value::Bool(true));
    partial
}

fn last_seen_fields(now: DateTime<Utc>) -> Map<String, Value> {
    let mut partial = Map::new();
    partial.insert("lastSeenAt".to_string(), Value::from(now.timestamp_millis()));
    partial
}
