//! File handoff requests between two devices.
//!
//! A transfer record lives under the receiver's subtree at
//! `transfers/{receiverId}/{key}` from creation until it is deleted by a
//! rejection, by the receiver finishing with it, or by housekeeping. There is
//! no stored terminal status: completion and rejection are both modeled as
//! disappearance.

mod coordinator;
mod state;

pub use coordinator::{InboundWatch, OutboundTransfer, TransferCoordinator};
pub use state::{Observation, OutboundStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::DeviceId;
use crate::relay::RelayError;
use crate::store::{DocPath, DocumentStore, StoreError};

/// Root of every receiver's inbound subtree.
pub const TRANSFERS_ROOT: &str = "transfers";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Transfer {key} for {receiver} not found")]
    NotFound { receiver: DeviceId, key: String },
    #[error("Upload failed: {0}")]
    Relay(#[from] RelayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
}

/// A single file handoff request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub sender_id: DeviceId,
    pub payload_url: String,
    /// Sender-supplied, unverified
    pub filename: String,
    /// Sender-supplied, unverified
    pub file_size_bytes: u64,
    pub status: TransferStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn pending(
        sender_id: DeviceId,
        payload_url: impl Into<String>,
        filename: impl Into<String>,
        file_size_bytes: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id,
            payload_url: payload_url.into(),
            filename: filename.into(),
            file_size_bytes,
            status: TransferStatus::Pending,
            created_at,
        }
    }

    /// Parse a stored snapshot; partial records yield `None`.
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// What the receiver can do with an inbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundPhase {
    /// Waiting for accept or reject
    AwaitingDecision,
    /// Accepted; the payload can be downloaded, then marked done
    ReadyToDownload,
}

/// One entry of a receiver's inbound list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundTransfer {
    pub key: String,
    pub record: TransferRecord,
}

impl InboundTransfer {
    pub fn phase(&self) -> InboundPhase {
        match self.record.status {
            TransferStatus::Pending => InboundPhase::AwaitingDecision,
            TransferStatus::Accepted => InboundPhase::ReadyToDownload,
        }
    }
}

pub fn inbound_path(receiver: &DeviceId) -> Result<DocPath, StoreError> {
    DocPath::root(TRANSFERS_ROOT)?.child(receiver.as_str())
}

pub fn transfer_path(receiver: &DeviceId, key: &str) -> Result<DocPath, StoreError> {
    inbound_path(receiver)?.child(key)
}

/// Every parseable transfer in a snapshot of one receiver's subtree, most
/// recent first. Malformed children are skipped.
pub fn parse_inbound(snapshot: Option<&Value>) -> Vec<InboundTransfer> {
    let Some(Value::Object(children)) = snapshot else {
        return Vec::new();
    };

    let mut transfers: Vec<InboundTransfer> = children
        .iter()
        .filter_map(|(key, value)| match TransferRecord::from_snapshot(value) {
            Some(record) => Some(InboundTransfer {
                key: key.clone(),
                record,
            }),
            None => {
                tracing::debug!(key = %key, "Skipping malformed transfer record");
                None
            }
        })
        .collect();

    transfers.sort_by(|a, b| {
        b.record
            .created_at
            .cmp(&a.record.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    transfers
}

/// Write a pending record under a fresh key without observing it.
pub async fn create_transfer(
    store: &dyn DocumentStore,
    receiver: &DeviceId,
    record: &TransferRecord,
) -> Result<String, TransferError> {
    let key = store.generate_key()?;
    store
        .write(&transfer_path(receiver, &key)?, serde_json::to_value(record)?)
        .await?;
    Ok(key)
}

/// Mark a transfer accepted, refusing to recreate one that has vanished.
///
/// Read-then-write: a deletion landing between the read and the merge still
/// leaves a bare `{status}` record behind, which housekeeping removes.
pub async fn accept_transfer(
    store: &dyn DocumentStore,
    receiver: &DeviceId,
    key: &str,
) -> Result<(), TransferError> {
    let path = transfer_path(receiver, key)?;
    let Some(current) = store.read(&path).await? else {
        return Err(TransferError::NotFound {
            receiver: receiver.clone(),
            key: key.to_string(),
        });
    };

    if Observation::from_snapshot(Some(&current)) == Observation::Present(TransferStatus::Accepted) {
        return Ok(());
    }

    let mut partial = Map::new();
    partial.insert("status".to_string(), serde_json::to_value(TransferStatus::Accepted)?);
    store.merge(&path, partial).await?;
    Ok(())
}

/// Delete a transfer. Used for both rejection and completion; the sender
/// tells them apart by the last status it observed.
pub async fn delete_transfer(
    store: &dyn DocumentStore,
    receiver: &DeviceId,
    key: &str,
) -> Result<(), TransferError> {
    store.delete(&transfer_path(receiver, key)?).await?;
    Ok(())
}
