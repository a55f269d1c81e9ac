use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::store_error;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::housekeeping;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub presence_deleted: u64,
    pub transfers_deleted: u64,
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<CleanupRequest>,
) -> Result<Json<JSend<CleanupResponse>>, ApiError> {
    let config = &state.config.housekeeping;
    if !housekeeping::authorize(request.secret.as_deref(), config.secret.as_deref()) {
        tracing::warn!("Rejected cleanup request with a bad secret");
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    let stats = housekeeping::sweep(state.store.as_ref(), state.clock.now(), config)
        .await
        .map_err(store_error)?;

    tracing::info!(
        presence_deleted = stats.presence_deleted,
        transfers_deleted = stats.transfers_deleted,
        "Cleanup completed"
    );

    Ok(JSend::success(CleanupResponse {
        message: "Cleanup successful".to_string(),
        presence_deleted: stats.presence_deleted,
        transfers_deleted: stats.transfers_deleted,
    }))
}
