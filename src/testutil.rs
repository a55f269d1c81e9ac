//! Shared test helpers for peer-drop API tests.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, ManualClock};
use crate::config::{Config, HousekeepingConfig, NodeConfig, PresenceConfig, RelayConfig};
use crate::relay::UploadRelay;
use crate::storage::Database;
use crate::store::LocalStore;
use crate::AppState;

pub const TEST_SECRET: &str = "test-secret";

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
        },
        housekeeping: HousekeepingConfig {
            secret: Some(TEST_SECRET.to_string()),
            ..HousekeepingConfig::default()
        },
        presence: PresenceConfig::default(),
        relay: RelayConfig {
            timeout: Duration::from_secs(5),
            ..RelayConfig::default()
        },
        test_mode: true,
        max_upload_size: 1024 * 1024, // 1MB for tests
    }
}

/// Create a test AppState with a temporary database, the given relay and a
/// manual clock the test can move.
pub fn test_state_with(
    temp_dir: &tempfile::TempDir,
    relay: UploadRelay,
    clock: Arc<ManualClock>,
) -> Arc<AppState> {
    let config = test_config(temp_dir);
    let db = Database::open(&config.node.data_dir).expect("Failed to open test database");
    let store = LocalStore::new(db.clone());
    let clock: Arc<dyn Clock> = clock;

    Arc::new(AppState {
        clock,
        config,
        db,
        http: reqwest::Client::new(),
        relay,
        store: Arc::new(store),
    })
}

/// Create a test AppState with no upload targets.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    test_state_with(
        temp_dir,
        UploadRelay::new(Vec::new()),
        Arc::new(ManualClock::default()),
    )
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

/// Serve the full API for `state` and return its base URL.
pub async fn spawn_app(state: Arc<AppState>) -> String {
    serve(crate::api::create_router(state)).await
}
