//! peer-drop - Device presence and file handoff over a shared document store
//!
//! This crate provides:
//! - A hierarchical document store (redb-backed) with change subscriptions
//! - Presence: registration, heartbeats and derived online/offline peer lists
//! - Transfers: request/accept/reject/complete state machine between two devices
//! - An upload relay fanning blobs out to public file hosts, and a download proxy
//! - Secret-gated housekeeping of expired presence and transfer records
//! - REST + Server-Sent Events API so browser clients can share the store

pub mod api;
pub mod clock;
pub mod config;
pub mod housekeeping;
pub mod identity;
pub mod presence;
pub mod relay;
pub mod storage;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod transfer;
pub mod watch;

use std::sync::Arc;

use clock::Clock;
use config::Config;
use relay::UploadRelay;
use storage::Database;
use store::DocumentStore;

/// Shared application state
pub struct AppState {
    pub clock: Arc<dyn Clock>,
    pub config: Config,
    pub db: Database,
    /// Client for the download proxy
    pub http: reqwest::Client,
    pub relay: UploadRelay,
    pub store: Arc<dyn DocumentStore>,
}
