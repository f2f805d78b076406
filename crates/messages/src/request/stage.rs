//! Stage re-request message.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::{RoundNumber, SenderIndex, StageKind};

/// Asks for a stage vote that has not arrived.
///
/// First escalation tier sends this directly to the silent node; the second
/// tier broadcasts it so any neighbor holding the vote can relay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    /// Round the missing vote belongs to.
    pub round: RoundNumber,
    /// Which stage's vote is missing.
    pub kind: StageKind,
    /// Confidant index of the requester.
    pub from: SenderIndex,
    /// Confidant index whose vote is required.
    pub required: SenderIndex,
}

impl NetworkMessage for StageRequest {
    fn message_type_id() -> &'static str {
        "stage.request"
    }
}
