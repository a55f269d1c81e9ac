use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{DocPath, StoreError};

/// A live view of one path in the document tree.
///
/// The first snapshot is the value at subscribe time; every later snapshot
/// follows a committed change that overlaps the path, in commit order. `None`
/// means nothing is stored at or below the path. Dropping the handle
/// unsubscribes.
pub struct Subscription {
    path: DocPath,
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    pub fn path(&self) -> &DocPath {
        &self.path
    }

    /// Wait for the next snapshot. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    /// Stop receiving notifications. Equivalent to dropping the handle.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

struct Subscriber {
    path: DocPath,
    last: Option<Value>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

/// Fan-out of change notifications to in-process subscribers.
#[derive(Default)]
pub(crate) struct SubscriberHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SubscriberHub {
    /// Register a subscriber and queue its initial snapshot. The caller must
    /// hold the store's write lock so no change can slip in between reading
    /// `initial` and registering.
    pub fn register(&self, path: DocPath, initial: Option<Value>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(initial.clone());

        self.lock().push(Subscriber {
            path: path.clone(),
            last: initial,
            tx,
        });

        Subscription { path, rx }
    }

    /// Send a fresh snapshot to every live subscriber overlapping `changed`,
    /// skipping subscribers whose snapshot did not actually change.
    pub fn publish<F>(&self, changed: &DocPath, mut snapshot: F)
    where
        F: FnMut(&DocPath) -> Result<Option<Value>, StoreError>,
    {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        for subscriber in subscribers.iter_mut() {
            if !subscriber.path.overlaps(changed) {
                continue;
            }

            let current = match snapshot(&subscriber.path) {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(path = %subscriber.path, error = %e, "Failed to read snapshot for subscriber");
                    continue;
                }
            };

            if current == subscriber.last {
                continue;
            }

            subscriber.last = current.clone();
            let _ = subscriber.tx.send(current);
        }
    }

    /// Number of subscribers that have not been dropped.
    pub fn live(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
