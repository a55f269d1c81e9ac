use std::path::Path;
use std::sync::Arc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};

use super::subscription::SubscriberHub;
use super::{DocPath, DocumentStore, StoreError, Subscription};
use crate::storage::Database;

/// Document store persisted in the embedded redb database, with change
/// notification for subscribers in this process.
///
/// redb transactions are synchronous, so every operation runs on the blocking
/// pool and never stalls the async runtime.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    hub: SubscriberHub,
    /// Serializes mutations so notifications go out in commit order.
    write_lock: Mutex<()>,
    rng: SystemRandom,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                hub: SubscriberHub::default(),
                write_lock: Mutex::new(()),
                rng: SystemRandom::new(),
            }),
        }
    }

    /// Open or create a store under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(data_dir)?))
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Subscriptions that are still being delivered to.
    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.live()
    }

    async fn blocking<F, R>(&self, op: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Inner) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Backend(format!("Store task failed: {e}")))?
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `mutation` under the write lock and notify overlapping subscribers
    /// if it reports a change.
    fn apply<F>(&self, path: &DocPath, mutation: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Database) -> Result<bool, StoreError>,
    {
        let _guard = self.lock();
        if mutation(&self.db)? {
            self.hub
                .publish(path, |watched| Ok(self.db.read_tree(&watched.to_string())?));
        }
        Ok(())
    }

    fn register(&self, path: DocPath) -> Result<Subscription, StoreError> {
        let _guard = self.lock();
        let initial = self.db.read_tree(&path.to_string())?;
        Ok(self.hub.register(path, initial))
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn write(&self, path: &DocPath, record: Value) -> Result<(), StoreError> {
        if record.is_null() {
            return self.delete(path).await;
        }

        let target = path.clone();
        self.blocking(move |inner| {
            let key = target.to_string();
            inner.apply(&target, |db| Ok(db.put_document(&key, &record)?))
        })
        .await?;
        tracing::trace!(path = %path, "Wrote document");
        Ok(())
    }

    async fn merge(&self, path: &DocPath, partial: Map<String, Value>) -> Result<(), StoreError> {
        let target = path.clone();
        self.blocking(move |inner| inner.apply(&target, |db| merge_into(db, &target, partial)))
            .await?;
        tracing::trace!(path = %path, "Merged document");
        Ok(())
    }

    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let key = path.to_string();
        self.blocking(move |inner| Ok(inner.db.read_tree(&key)?))
            .await
    }

    async fn subscribe(&self, path: &DocPath) -> Result<Subscription, StoreError> {
        let target = path.clone();
        let subscription = self.blocking(move |inner| inner.register(target)).await?;
        tracing::trace!(path = %path, "Subscribed");
        Ok(subscription)
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let target = path.clone();
        self.blocking(move |inner| {
            let key = target.to_string();
            inner.apply(&target, |db| Ok(db.delete_tree(&key)? > 0))
        })
        .await?;
        tracing::trace!(path = %path, "Deleted document");
        Ok(())
    }

    fn generate_key(&self) -> Result<String, StoreError> {
        // 6 bytes of millisecond timestamp, 10 random bytes
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
        self.inner
            .rng
            .fill(&mut bytes[6..])
            .map_err(|_| StoreError::KeyGeneration)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Merge into a record, or into the children of an interior path.
fn merge_into(db: &Database, path: &DocPath, partial: Map<String, Value>) -> Result<bool, StoreError> {
    let key = path.to_string();
    let exact = db.get_document(&key)?;

    if exact.is_none() && db.read_tree(&key)?.is_some() {
        let mut changed = false;
        for (field, value) in partial {
            let child = path.child(&field)?.to_string();
            changed |= if value.is_null() {
                db.delete_tree(&child)? > 0
            } else {
                db.put_document(&child, &value)?
            };
        }
        return Ok(changed);
    }

    let mut record = match exact {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (field, value) in partial {
        if value.is_null() {
            record.remove(&field);
        } else {
            record.insert(field, value);
        }
    }

    if record.is_empty() {
        Ok(db.delete_tree(&key)? > 0)
    } else {
        Ok(db.put_document(&key, &Value::Object(record))?)
    }
}
