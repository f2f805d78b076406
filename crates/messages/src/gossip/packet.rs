//! Transaction packet gossip.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::TransactionsPacket;

/// Gossips a sealed transaction packet ahead of the round that will use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketGossip {
    /// The sealed packet.
    pub packet: TransactionsPacket,
}

impl NetworkMessage for PacketGossip {
    fn message_type_id() -> &'static str {
        "packet.gossip"
    }
}
