mod admin;
mod documents;
mod housekeeping;
mod presence;
mod relay;
mod transfers;

use crate::api::response::ApiError;
use crate::presence::PresenceError;
use crate::relay::RelayError;
use crate::store::StoreError;
use crate::transfer::TransferError;

pub use admin::{admin_purge, health};
pub use documents::{
    delete_document, merge_document, push_document, read_document, watch_document,
    write_document,
};
pub use housekeeping::cleanup;
pub use presence::{find_peer, go_offline, list_peers};
pub use relay::{download, upload};
pub use transfers::{accept_transfer, complete_transfer, create_transfer, reject_transfer};

/// Map a StoreError to an ApiError
fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::InvalidPath(_) => ApiError::bad_request(e.to_string()),
        _ => ApiError::internal(e.to_string()),
    }
}

fn presence_error(e: PresenceError) -> ApiError {
    match e {
        PresenceError::Store(e) => store_error(e),
        PresenceError::NotRegistered(id) => ApiError::not_found(format!("Device {id} is not registered")),
        _ => ApiError::internal(e.to_string()),
    }
}

fn transfer_error(e: TransferError) -> ApiError {
    match e {
        TransferError::Store(e) => store_error(e),
        TransferError::NotFound { .. } => ApiError::not_found(e.to_string()),
        TransferError::Relay(e) => relay_error(e),
        _ => ApiError::internal(e.to_string()),
    }
}

fn relay_error(e: RelayError) -> ApiError {
    match e {
        RelayError::NoEligibleTarget(_) => ApiError::unsupported_media_type(e.to_string()),
        _ => ApiError::bad_gateway(e.to_string()),
    }
}
