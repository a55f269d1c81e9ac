use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peer_drop::{
    api,
    clock::{Clock, SystemClock},
    config::Config,
    housekeeping,
    relay::UploadRelay,
    storage::Database,
    store::{DocumentStore, LocalStore},
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "peer-drop starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database and the document store on top of it
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);
    let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::new(db.clone()));

    let relay = UploadRelay::from_config(&config.relay)?;
    let http = reqwest::Client::builder()
        .timeout(config.relay.timeout)
        .build()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Periodic housekeeping, if configured
    let housekeeping_handle = config.housekeeping.interval.map(|period| {
        info!(period_secs = period.as_secs(), "Starting housekeeping task");
        housekeeping::spawn_housekeeping_task(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.housekeeping.clone(),
            period,
        )
    });

    // Create shared state
    let state = Arc::new(AppState {
        clock,
        config: config.clone(),
        db,
        http,
        relay,
        store,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    if let Some(handle) = housekeeping_handle {
        info!("Shutting down background tasks");
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
