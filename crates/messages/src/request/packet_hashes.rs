//! Packet synchronization request.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::{Hash, PublicKey, RoundNumber};

/// Asks peers for the packets behind a set of hashes from a round table.
///
/// Broadcast by a node whose local store is missing packets it needs before
/// it can vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHashesRequest {
    /// Round whose table referenced the hashes.
    pub round: RoundNumber,
    /// The missing packet hashes.
    pub hashes: Vec<Hash>,
    /// Key of the requesting node, so replies can be addressed directly.
    pub requester: PublicKey,
}

impl NetworkMessage for PacketHashesRequest {
    fn message_type_id() -> &'static str {
        "packet_hashes.request"
    }
}
