use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TransferStatus;

/// What one notification says about a watched transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Absent,
    Present(TransferStatus),
    /// Present, but without a recognizable status
    Unrecognized,
}

impl Observation {
    pub fn from_snapshot(snapshot: Option<&Value>) -> Self {
        match snapshot {
            None => Observation::Absent,
            Some(value) => value
                .get("status")
                .and_then(|status| TransferStatus::deserialize(status).ok())
                .map_or(Observation::Unrecognized, Observation::Present),
        }
    }
}

/// The sender's view of a transfer it created.
///
/// The store gives no reason on delete, so the last status seen before the
/// record disappeared decides whether it was rejected or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundStatus {
    /// The record has not been seen yet
    Unobserved,
    Pending,
    Accepted,
    /// Deleted while pending
    Rejected,
    /// Deleted after being accepted
    Completed,
}

impl OutboundStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboundStatus::Rejected | OutboundStatus::Completed)
    }

    /// Fold one observation into the current status. Terminal states never
    /// change, and an accepted transfer never goes back to pending.
    pub fn observe(self, observation: Observation) -> Self {
        use OutboundStatus::*;

        match (self, observation) {
            (Rejected | Completed, _) => self,
            (_, Observation::Unrecognized) => self,
            (Unobserved, Observation::Absent) => Unobserved,
            (Pending, Observation::Absent) => Rejected,
            (Accepted, Observation::Absent) => Completed,
            (Accepted, Observation::Present(_)) => Accepted,
            (_, Observation::Present(TransferStatus::Pending)) => Pending,
            (_, Observation::Present(TransferStatus::Accepted)) => Accepted,
        }
    }
}
