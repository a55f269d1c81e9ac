//! Out-of-band expiry of presence and transfer records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time;

use crate::clock::Clock;
use crate::config::HousekeepingConfig;
use crate::identity::DeviceId;
use crate::presence::{presence_path, PresenceRecord, PRESENCE_ROOT};
use crate::store::{DocPath, DocumentStore, StoreError};
use crate::transfer::{inbound_path, transfer_path, TransferRecord, TRANSFERS_ROOT};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub presence_deleted: u64,
    pub transfers_deleted: u64,
}

/// Check a caller-supplied secret against the configured one. Without a
/// configured secret nothing is authorized.
pub fn authorize(provided: Option<&str>, configured: Option<&str>) -> bool {
    match (provided, configured) {
        (Some(provided), Some(configured)) => !configured.is_empty() && provided == configured,
        _ => false,
    }
}

/// Delete presence records not seen within `presence_max_age` (along with
/// that device's inbound transfers) and transfers older than
/// `transfer_max_age`. Records too damaged to parse are deleted too, such as a
/// bare `{isOnline}` left when a device unregisters while it is marked offline.
pub async fn sweep(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
    config: &HousekeepingConfig,
) -> Result<SweepStats, StoreError> {
    let mut stats = SweepStats::default();

    if let Some(Value::Object(devices)) = store.read(&DocPath::root(PRESENCE_ROOT)?).await? {
        for (id, record) in &devices {
            let expired = match PresenceRecord::from_snapshot(record) {
                Some(record) => older_than(record.last_seen_at, now, config.presence_max_age),
                None => true,
            };
            if !expired {
                continue;
            }

            let id = DeviceId::new(id.as_str());
            tracing::info!(device_id = %id, "Deleting inactive device");
            store.delete(&presence_path(&id)?).await?;
            store.delete(&inbound_path(&id)?).await?;
            stats.presence_deleted += 1;
        }
    }

    if let Some(Value::Object(receivers)) = store.read(&DocPath::root(TRANSFERS_ROOT)?).await? {
        for (receiver, inbound) in &receivers {
            let Value::Object(transfers) = inbound else {
                continue;
            };
            let receiver = DeviceId::new(receiver.as_str());

            for (key, record) in transfers {
                let expired = match TransferRecord::from_snapshot(record) {
                    Some(record) => older_than(record.created_at, now, config.transfer_max_age),
                    None => true,
                };
                if !expired {
                    continue;
                }

                tracing::debug!(receiver = %receiver, key = %key, "Deleting expired transfer");
                store.delete(&transfer_path(&receiver, key)?).await?;
                stats.transfers_deleted += 1;
            }
        }
    }

    Ok(stats)
}

fn older_than(at: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    now.signed_duration_since(at)
        .to_std()
        .is_ok_and(|age| age > max_age)
}

/// Sweep on a fixed period until the task is aborted.
pub fn spawn_housekeeping_task(
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: HousekeepingConfig,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        loop {
            interval.tick().await;
            match sweep(store.as_ref(), clock.now(), &config).await {
                Ok(stats) => tracing::debug!(
                    presence_deleted = stats.presence_deleted,
                    transfers_deleted = stats.transfers_deleted,
                    "Housekeeping sweep completed"
                ),
                Err(e) => tracing::error!(error = %e, "Housekeeping sweep failed"),
            }
        }
    })
}
