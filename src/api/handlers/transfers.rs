use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::transfer_error;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::identity::DeviceId;
use crate::transfer::{self, TransferRecord};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub payload_url: String,
    pub filename: String,
    #[serde(default)]
    pub file_size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateTransferResponse {
    pub key: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<CreateTransferRequest>,
) -> Result<Json<JSend<CreateTransferResponse>>, ApiError> {
    if request.sender_id.trim().is_empty() || request.receiver_id.trim().is_empty() {
        return Err(ApiError::bad_request("senderId and receiverId are required"));
    }
    if request.filename.trim().is_empty() {
        return Err(ApiError::bad_request("filename is required"));
    }
    match url::Url::parse(&request.payload_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => return Err(ApiError::bad_request("payloadUrl must be an http(s) URL")),
    }

    let receiver = DeviceId::new(request.receiver_id);
    let record = TransferRecord::pending(
        DeviceId::new(request.sender_id),
        request.payload_url,
        request.filename,
        request.file_size_bytes,
        state.clock.now(),
    );

    let key = transfer::create_transfer(state.store.as_ref(), &receiver, &record)
        .await
        .map_err(transfer_error)?;

    tracing::info!(sender = %record.sender_id, receiver = %receiver, key = %key, "Transfer requested");
    Ok(JSend::success(CreateTransferResponse { key }))
}

pub async fn accept_transfer(
    State(state): State<Arc<AppState>>,
    Path((receiver, key)): Path<(String, String)>,
) -> Result<Json<JSend<()>>, ApiError> {
    transfer::accept_transfer(state.store.as_ref(), &DeviceId::new(receiver), &key)
        .await
        .map_err(transfer_error)?;
    Ok(JSend::success(()))
}

/// Deleting a pending transfer is a rejection.
pub async fn reject_transfer(
    State(state): State<Arc<AppState>>,
    Path((receiver, key)): Path<(String, String)>,
) -> Result<Json<JSend<()>>, ApiError> {
    transfer::delete_transfer(state.store.as_ref(), &DeviceId::new(receiver), &key)
        .await
        .map_err(transfer_error)?;
    Ok(JSend::success(()))
}

/// Deleting an accepted transfer is a completion.
pub async fn complete_transfer(
    State(state): State<Arc<AppState>>,
    Path((receiver, key)): Path<(String, String)>,
) -> Result<Json<JSend<()>>, ApiError> {
    transfer::delete_transfer(state.store.as_ref(), &DeviceId::new(receiver), &key)
        .await
        .map_err(transfer_error)?;
    Ok(JSend::success(()))
}
