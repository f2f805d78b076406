//! Round-start messages.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::{PublicKey, RoundNumber, RoundTable};

/// Announces the next round's table: trusted set and packet hashes.
///
/// Sent by the previous round's writer; receipt starts the round on every
/// node, participant or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTableGossip {
    /// The new round's table.
    pub table: RoundTable,
}

impl NetworkMessage for RoundTableGossip {
    fn message_type_id() -> &'static str {
        "round_table.gossip"
    }
}

/// Announces which node won writer election for a round.
///
/// Informational for non-participants; consensus nodes derive the writer
/// themselves in stage three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterNotification {
    /// Round the election belongs to.
    pub round: RoundNumber,
    /// Public key of the elected writer.
    pub writer: PublicKey,
}

impl NetworkMessage for WriterNotification {
    fn message_type_id() -> &'static str {
        "writer.notification"
    }
}
