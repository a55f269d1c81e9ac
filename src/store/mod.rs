mod local;
mod path;
mod subscription;

pub use local::LocalStore;
pub use path::{DocPath, MAX_SEGMENT_LEN};
pub use subscription::Subscription;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Invalid path segment: {0:?}")]
    InvalidPath(String),
    #[error("Key generation failed")]
    KeyGeneration,
    #[error("Backend error: {0}")]
    Backend(String),
}

/// The shared document tree every device reads and mutates.
///
/// There are no transactions and no compare-and-swap: callers that need
/// "only if still X" semantics read first and accept the residual race.
/// Last write wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace whatever is stored at `path` with `record`. Writing `null`
    /// deletes the path.
    async fn write(&self, path: &DocPath, record: Value) -> Result<(), StoreError>;

    /// Shallow-merge `partial` into the record at `path`. A `null` field
    /// removes that field. Merging onto an absent path creates a record
    /// holding only the merged fields.
    async fn merge(&self, path: &DocPath, partial: Map<String, Value>) -> Result<(), StoreError>;

    /// One-shot read of the record at `path`, or of the subtree beneath it.
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    /// Watch `path` for changes. See [`Subscription`].
    async fn subscribe(&self, path: &DocPath) -> Result<Subscription, StoreError>;

    /// Remove the record at `path` and everything beneath it.
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// A fresh key, unique across devices, suitable as a child segment.
    fn generate_key(&self) -> Result<String, StoreError>;
}
