use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    let mut router = Router::new()
        // Document store
        .route(
            "/db/*path",
            get(handlers::read_document)
                .put(handlers::write_document)
                .patch(handlers::merge_document)
                .post(handlers::push_document)
                .delete(handlers::delete_document),
        )
        .route("/watch/*path", get(handlers::watch_document))
        // Presence
        .route("/api/go-offline", post(handlers::go_offline))
        .route("/api/peers", get(handlers::list_peers))
        .route("/api/peers/:id", get(handlers::find_peer))
        // Transfers
        .route("/api/transfers", post(handlers::create_transfer))
        .route(
            "/api/transfers/:receiver/:key/accept",
            post(handlers::accept_transfer),
        )
        .route(
            "/api/transfers/:receiver/:key/reject",
            post(handlers::reject_transfer),
        )
        .route(
            "/api/transfers/:receiver/:key/done",
            post(handlers::complete_transfer),
        )
        // Relay
        .route(
            "/api/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/download", get(handlers::download))
        // Housekeeping
        .route("/api/cleanup", post(handlers::cleanup))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
