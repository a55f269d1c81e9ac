use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    find_peer, last_seen_fields, mark_offline, online_fields, online_peers, presence_path, Peer,
    PeerLookup, PresenceError, PresenceRecord, PRESENCE_ROOT,
};
use crate::clock::Clock;
use crate::config::PresenceConfig;
use crate::identity::{DeviceId, IdentityProvider};
use crate::store::{DocPath, DocumentStore};
use crate::watch::LiveView;

/// Live list of effectively online peers. Dropping it unsubscribes.
pub type PeerWatch = LiveView<Vec<Peer>>;

/// Owns this device's presence record and its heartbeat.
pub struct PresenceManager {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    identity: IdentityProvider,
    device_id: DeviceId,
    path: DocPath,
    config: PresenceConfig,
    /// Held for the whole of every lifecycle transition so they never interleave.
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl PresenceManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        identity: IdentityProvider,
        config: PresenceConfig,
    ) -> Result<Self, PresenceError> {
        let device_id = identity.load_or_create()?;
        let path = presence_path(&device_id)?;

        Ok(Self {
            store,
            clock,
            identity,
            device_id,
            path,
            config,
            heartbeat: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Write a fresh presence record, offline until [`go_online`](Self::go_online).
    ///
    /// An empty name writes nothing; callers validate before calling.
    /// Names are not unique.
    pub async fn register(&self, display_name: &str) -> Result<(), PresenceError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            warn!(device_id = %self.device_id, "Ignoring registration with an empty display name");
            return Ok(());
        }

        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(running) = heartbeat.take() {
            running.stop().await;
        }

        let record = PresenceRecord {
            display_name: display_name.to_string(),
            is_online: false,
            last_seen_at: self.clock.now(),
        };
        self.store
            .write(&self.path, serde_json::to_value(&record)?)
            .await?;

        info!(device_id = %self.device_id, display_name, "Registered device");
        Ok(())
    }

    /// Become visible and start heartbeating. Calling it while online just
    /// refreshes `lastSeenAt`.
    pub async fn go_online(&self) -> Result<(), PresenceError> {
        let mut heartbeat = self.heartbeat.lock().await;

        if self.store.read(&self.path).await?.is_none() {
            return Err(PresenceError::NotRegistered(self.device_id.clone()));
        }
        self.store
            .merge(&self.path, online_fields(self.clock.now()))
            .await?;

        if heartbeat.as_ref().map_or(true, Heartbeat::is_finished) {
            *heartbeat = Some(Heartbeat::start(
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                self.path.clone(),
                self.config.heartbeat_interval,
            ));
            debug!(device_id = %self.device_id, "Heartbeat started");
        }
        Ok(())
    }

    /// Stop heartbeating, then clear `isOnline`. Best-effort: store failures
    /// are logged, never returned.
    pub async fn go_offline(&self) {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(running) = heartbeat.take() {
            running.stop().await;
        }

        match mark_offline(self.store.as_ref(), &self.device_id).await {
            Ok(true) => debug!(device_id = %self.device_id, "Marked offline"),
            Ok(false) => debug!(device_id = %self.device_id, "No presence record to mark offline"),
            Err(e) => warn!(device_id = %self.device_id, error = %e, "Failed to mark device offline"),
        }
    }

    /// Refresh `lastSeenAt` once. Returns false if the record no longer exists.
    pub async fn heartbeat(&self) -> bool {
        beat(self.store.as_ref(), self.clock.as_ref(), &self.path).await
    }

    /// Whether a heartbeat task is currently scheduled.
    pub async fn is_heartbeating(&self) -> bool {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Delete the presence record and this device's identity. The next
    /// manager created on this data directory gets a new identity.
    pub async fn unregister(self) -> Result<(), PresenceError> {
        {
            let mut heartbeat = self.heartbeat.lock().await;
            if let Some(running) = heartbeat.take() {
                running.stop().await;
            }
        }

        self.store.delete(&self.path).await?;
        self.identity.forget()?;

        info!(device_id = %self.device_id, "Unregistered device");
        Ok(())
    }

    /// Watch the presence set and publish the effectively online peers,
    /// excluding this device. Recomputed on every change and on every
    /// heartbeat period, so silently stale peers drop out too.
    pub async fn list_online_peers(&self) -> Result<PeerWatch, PresenceError> {
        let mut subscription = self.store.subscribe(&DocPath::root(PRESENCE_ROOT)?).await?;
        let clock = Arc::clone(&self.clock);
        let own_id = self.device_id.clone();
        let threshold = self.config.stale_threshold;
        let period = self.config.heartbeat_interval;

        Ok(LiveView::spawn(Vec::new(), move |tx, cancelled| async move {
            let mut latest = None;
            let mut recheck = interval_at(Instant::now() + period, period);
            recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    snapshot = subscription.next() => match snapshot {
                        Some(snapshot) => latest = snapshot,
                        None => break,
                    },
                    _ = recheck.tick() => {}
                }

                let peers = online_peers(latest.as_ref(), clock.now(), threshold, Some(&own_id));
                tx.send_if_modified(|current| {
                    if *current == peers {
                        false
                    } else {
                        *current = peers;
                        true
                    }
                });
            }
            debug!(device_id = %own_id, "Peer watch stopped");
        }))
    }

    /// One-shot read of the effectively online peers.
    pub async fn peers_now(&self) -> Result<Vec<Peer>, PresenceError> {
        let snapshot = self.store.read(&DocPath::root(PRESENCE_ROOT)?).await?;
        Ok(online_peers(
            snapshot.as_ref(),
            self.clock.now(),
            self.config.stale_threshold,
            Some(&self.device_id),
        ))
    }

    /// Address a device directly by identifier instead of browsing.
    pub async fn find_peer_by_id(&self, id: &DeviceId) -> Result<PeerLookup, PresenceError> {
        find_peer(
            self.store.as_ref(),
            id,
            self.clock.now(),
            self.config.stale_threshold,
        )
        .await
    }
}

/// Refresh `lastSeenAt` if the record still exists. Failures are logged and
/// treated as "keep going".
async fn beat(store: &dyn DocumentStore, clock: &dyn Clock, path: &DocPath) -> bool {
    match store.read(path).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(path = %path, "Presence record vanished, stopping heartbeat");
            return false;
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Heartbeat read failed");
            return true;
        }
    }

    if let Err(e) = store.merge(path, last_seen_fields(clock.now())).await {
        warn!(path = %path, error = %e, "Heartbeat write failed");
    }
    true
}

/// A scheduled heartbeat. Dropping it cancels the schedule; [`stop`](Self::stop)
/// additionally waits for an in-flight beat to land.
struct Heartbeat {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn start(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        path: DocPath,
        period: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if !beat(store.as_ref(), clock.as_ref(), &path).await {
                            break;
                        }
                    }
                }
            }
            debug!(path = %path, "Heartbeat stopped");
        });

        Self {
            token,
            task: Some(task),
        }
    }

    fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
