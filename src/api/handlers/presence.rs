use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{presence_error, store_error};
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::identity::DeviceId;
use crate::presence::{self, Peer, PeerLookup, PresenceRecord, PRESENCE_ROOT};
use crate::store::DocPath;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoOfflineRequest {
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct GoOfflineResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListPeersParams {
    /// Device asking; left out of its own list
    #[serde(default)]
    pub observer: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    NotFound,
    Offline,
    Online,
}

#[derive(Debug, Serialize)]
pub struct FindPeerResponse {
    pub state: PeerState,
    pub peer: Option<PresenceRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Best-effort offline marker for clients that are going away (sent as a
/// beacon on page unload). Store failures are logged, never surfaced.
pub async fn go_offline(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<GoOfflineRequest>,
) -> Result<Json<JSend<GoOfflineResponse>>, ApiError> {
    let device_id = request.device_id.trim();
    if device_id.is_empty() {
        return Err(ApiError::bad_request("Device ID is required"));
    }

    let device_id = DeviceId::new(device_id);
    let success = match presence::mark_offline(state.store.as_ref(), &device_id).await {
        Ok(existed) => existed,
        Err(e) => {
            tracing::warn!(device_id = %device_id, error = %e, "Failed to mark device offline");
            false
        }
    };

    Ok(JSend::success(GoOfflineResponse { success }))
}

pub async fn list_peers(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListPeersParams>,
) -> Result<Json<JSend<Vec<Peer>>>, ApiError> {
    let root = DocPath::root(PRESENCE_ROOT).map_err(store_error)?;
    let snapshot = state.store.read(&root).await.map_err(store_error)?;
    let observer = params.observer.as_deref().map(DeviceId::new);

    Ok(JSend::success(presence::online_peers(
        snapshot.as_ref(),
        state.clock.now(),
        state.config.presence.stale_threshold,
        observer.as_ref(),
    )))
}

pub async fn find_peer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<FindPeerResponse>>, ApiError> {
    let lookup = presence::find_peer(
        state.store.as_ref(),
        &DeviceId::new(id),
        state.clock.now(),
        state.config.presence.stale_threshold,
    )
    .await
    .map_err(presence_error)?;

    let (peer_state, peer) = match lookup {
        PeerLookup::NotFound => (PeerState::NotFound, None),
        PeerLookup::Offline(record) => (PeerState::Offline, Some(record)),
        PeerLookup::Online(record) => (PeerState::Online, Some(record)),
    };
    Ok(JSend::success(FindPeerResponse {
        state: peer_state,
        peer,
    }))
}
