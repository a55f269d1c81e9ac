use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{
    accept_transfer, delete_transfer, inbound_path, parse_inbound, transfer_path, InboundTransfer,
    Observation, OutboundStatus, TransferError, TransferRecord,
};
use crate::clock::Clock;
use crate::identity::DeviceId;
use crate::relay::{RelayError, UploadRelay};
use crate::store::DocumentStore;
use crate::watch::LiveView;

/// Live list of this device's inbound transfers, most recent first.
pub type InboundWatch = LiveView<Vec<InboundTransfer>>;

/// A transfer this device created, and the sender-side view of its status.
///
/// Only the creator holds the key; dropping this handle stops observing and
/// the status can no longer be learned.
#[derive(Debug)]
pub struct OutboundTransfer {
    key: String,
    receiver: DeviceId,
    status: LiveView<OutboundStatus>,
}

impl OutboundTransfer {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn receiver(&self) -> &DeviceId {
        &self.receiver
    }

    pub fn status(&self) -> OutboundStatus {
        self.status.current()
    }

    /// Wait for the next status change.
    pub async fn changed(&mut self) -> Option<OutboundStatus> {
        self.status.changed().await
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<OutboundStatus>
    where
        F: FnMut(&OutboundStatus) -> bool,
    {
        self.status.wait_for(predicate).await
    }

    /// Wait for rejection or completion. If observation stops first, the last
    /// known status is returned.
    pub async fn finished(&mut self) -> OutboundStatus {
        match self.status.wait_for(|s| s.is_terminal()).await {
            Some(status) => status,
            None => self.status.current(),
        }
    }

    /// Stop observing.
    pub fn cancel(&self) {
        self.status.cancel();
    }
}

/// Creates, observes and resolves transfers on behalf of one device.
pub struct TransferCoordinator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    device_id: DeviceId,
}

impl TransferCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, device_id: DeviceId) -> Self {
        Self {
            store,
            clock,
            device_id,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Create a pending transfer addressed to `receiver` and start watching it.
    ///
    /// The receiver is not checked for liveness; a transfer sent to an
    /// offline or unknown device simply goes unanswered.
    pub async fn initiate(
        &self,
        receiver: &DeviceId,
        payload_url: &str,
        filename: &str,
        file_size_bytes: u64,
    ) -> Result<OutboundTransfer, TransferError> {
        let key = self.store.generate_key()?;
        let path = transfer_path(receiver, &key)?;
        let record = TransferRecord::pending(
            self.device_id.clone(),
            payload_url,
            filename,
            file_size_bytes,
            self.clock.now(),
        );
        let value = serde_json::to_value(&record)?;

        // Subscribe before writing so not even a fast rejection is missed.
        let mut subscription = self.store.subscribe(&path).await?;
        let watched_key = key.clone();
        let status = LiveView::spawn(OutboundStatus::Unobserved, move |tx, cancelled| async move {
            loop {
                let snapshot = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    snapshot = subscription.next() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };

                let previous = *tx.borrow();
                let next = previous.observe(Observation::from_snapshot(snapshot.as_ref()));
                if next != previous {
                    debug!(key = %watched_key, from = ?previous, to = ?next, "Outbound transfer status changed");
                    tx.send_replace(next);
                }
                if next.is_terminal() {
                    break;
                }
            }
        });

        if let Err(e) = self.store.write(&path, value).await {
            status.cancel();
            return Err(e.into());
        }

        info!(
            sender = %self.device_id,
            receiver = %receiver,
            key = %key,
            filename,
            file_size_bytes,
            "Initiated transfer"
        );

        Ok(OutboundTransfer {
            key,
            receiver: receiver.clone(),
            status,
        })
    }

    /// Upload `data` through the relay, then initiate a transfer with the
    /// first URL it produced. Nothing is written if every target fails.
    pub async fn send_file(
        &self,
        relay: &UploadRelay,
        receiver: &DeviceId,
        filename: &str,
        data: Bytes,
    ) -> Result<OutboundTransfer, TransferError> {
        let size = data.len() as u64;
        let report = relay.upload(filename, data).await?;
        let Some(url) = report.url().map(str::to_string) else {
            return Err(RelayError::AllTargetsFailed(report).into());
        };

        self.initiate(receiver, &url, filename, size).await
    }

    /// Watch this device's inbound subtree. Every pending entry is a decision
    /// point and every accepted entry is ready to download; each is resolved
    /// independently of the others.
    pub async fn observe_inbound(&self) -> Result<InboundWatch, TransferError> {
        let mut subscription = self.store.subscribe(&inbound_path(&self.device_id)?).await?;
        let device_id = self.device_id.clone();

        Ok(LiveView::spawn(Vec::new(), move |tx, cancelled| async move {
            loop {
                let snapshot = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    snapshot = subscription.next() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };

                let transfers = parse_inbound(snapshot.as_ref());
                tx.send_if_modified(|current| {
                    if *current == transfers {
                        false
                    } else {
                        *current = transfers;
                        true
                    }
                });
            }
            debug!(device_id = %device_id, "Inbound watch stopped");
        }))
    }

    /// Accept an inbound transfer. Fails if the record is gone rather than
    /// recreating a partial one.
    pub async fn accept(&self, key: &str) -> Result<(), TransferError> {
        accept_transfer(self.store.as_ref(), &self.device_id, key).await?;
        info!(receiver = %self.device_id, key, "Accepted transfer");
        Ok(())
    }

    /// Reject an inbound transfer by deleting it.
    pub async fn reject(&self, key: &str) -> Result<(), TransferError> {
        delete_transfer(self.store.as_ref(), &self.device_id, key).await?;
        info!(receiver = %self.device_id, key, "Rejected transfer");
        Ok(())
    }

    /// Delete an inbound transfer once its payload has been retrieved.
    pub async fn mark_done(&self, key: &str) -> Result<(), TransferError> {
        if let Err(e) = delete_transfer(self.store.as_ref(), &self.device_id, key).await {
            warn!(receiver = %self.device_id, key, error = %e, "Failed to clear finished transfer");
            return Err(e);
        }
        info!(receiver = %self.device_id, key, "Finished transfer");
        Ok(())
    }
}
