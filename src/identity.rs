//! Stable per-device identity, persisted next to the device's local data.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const IDENTITY_FILE: &str = "device-id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque device identifier. Primary key for presence and the address
/// transfers are sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Issues a device identity once and keeps returning it for as long as the
/// identity file survives.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    path: PathBuf,
}

impl IdentityProvider {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join(IDENTITY_FILE),
        }
    }

    /// Return the persisted identity, generating and persisting one if needed.
    pub fn load_or_create(&self) -> Result<DeviceId, IdentityError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if !contents.trim().is_empty() => {
                return Ok(DeviceId::new(contents.trim()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let id = DeviceId::generate();
        std::fs::write(&self.path, id.as_str())?;
        tracing::info!(device_id = %id, "Issued new device identity");
        Ok(id)
    }

    /// Drop the persisted identity; the next load issues a new one.
    pub fn forget(&self) -> Result<(), IdentityError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
