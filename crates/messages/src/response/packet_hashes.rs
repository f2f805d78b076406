//! Packet synchronization reply.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::{RoundNumber, TransactionsPacket};

/// Delivers the packets a peer asked for.
///
/// Sent directly to the requester; carries only the subset the responder
/// actually holds, which may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHashesReply {
    /// Round the request referred to.
    pub round: RoundNumber,
    /// The sealed packets the responder found.
    pub packets: Vec<TransactionsPacket>,
}

impl NetworkMessage for PacketHashesReply {
    fn message_type_id() -> &'static str {
        "packet_hashes.reply"
    }
}
