use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::store_error;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::store::DocPath;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub key: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// `null` when nothing is stored at or beneath the path.
pub async fn read_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<JSend<Option<Value>>>, ApiError> {
    let path = DocPath::parse(&path).map_err(store_error)?;
    let value = state.store.read(&path).await.map_err(store_error)?;
    Ok(JSend::success(value))
}

pub async fn write_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    AppJson(record): AppJson<Value>,
) -> Result<Json<JSend<()>>, ApiError> {
    let path = DocPath::parse(&path).map_err(store_error)?;
    state.store.write(&path, record).await.map_err(store_error)?;
    Ok(JSend::success(()))
}

pub async fn merge_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    AppJson(partial): AppJson<Map<String, Value>>,
) -> Result<Json<JSend<()>>, ApiError> {
    let path = DocPath::parse(&path).map_err(store_error)?;
    state.store.merge(&path, partial).await.map_err(store_error)?;
    Ok(JSend::success(()))
}

/// Store `record` under a freshly generated child key.
pub async fn push_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    AppJson(record): AppJson<Value>,
) -> Result<Json<JSend<PushResponse>>, ApiError> {
    if record.is_null() {
        return Err(ApiError::bad_request("Cannot push null"));
    }

    let parent = DocPath::parse(&path).map_err(store_error)?;
    let key = state.store.generate_key().map_err(store_error)?;
    let path = parent.child(&key).map_err(store_error)?;
    state.store.write(&path, record).await.map_err(store_error)?;
    Ok(JSend::success(PushResponse { key }))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    let path = DocPath::parse(&path).map_err(store_error)?;
    state.store.delete(&path).await.map_err(store_error)?;
    Ok(JSend::success(()))
}

/// Stream snapshots of a path as `value` events, starting with the current
/// one. The subscription is released when the client disconnects.
pub async fn watch_document(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let path = DocPath::parse(&path).map_err(store_error)?;
    let subscription = state.store.subscribe(&path).await.map_err(store_error)?;
    tracing::debug!(path = %path, "Watch stream opened");

    let events = stream::unfold(subscription, |mut subscription| async move {
        let snapshot = subscription.next().await?;
        let event = Event::default()
            .event("value")
            .json_data(&snapshot)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to encode snapshot");
                Event::default().event("error").data(e.to_string())
            });
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
