//! Wire envelope over all protocol messages.

use crate::{
    PacketGossip, PacketHashesReply, PacketHashesRequest, RoundTableGossip, StageOneGossip,
    StageRequest, StageThreeGossip, StageTwoGossip, WriterNotification,
};
use serde::{Deserialize, Serialize};

/// Every message that travels between nodes, as one serializable enum.
///
/// The wire codec frames a serialized `ProtocolMessage` behind a version
/// byte; adding a variant is backwards-incompatible and must bump the codec
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    RoundTable(RoundTableGossip),
    StageOne(StageOneGossip),
    StageTwo(StageTwoGossip),
    StageThree(StageThreeGossip),
    StageRequest(StageRequest),
    Packet(PacketGossip),
    PacketHashesRequest(PacketHashesRequest),
    PacketHashesReply(PacketHashesReply),
    WriterNotification(WriterNotification),
}

impl ProtocolMessage {
    /// Stable identifier of the inner message, for logs.
    pub fn type_id(&self) -> &'static str {
        use crate::NetworkMessage;
        match self {
            ProtocolMessage::RoundTable(_) => RoundTableGossip::message_type_id(),
            ProtocolMessage::StageOne(_) => StageOneGossip::message_type_id(),
            ProtocolMessage::StageTwo(_) => StageTwoGossip::message_type_id(),
            ProtocolMessage::StageThree(_) => StageThreeGossip::message_type_id(),
            ProtocolMessage::StageRequest(_) => StageRequest::message_type_id(),
            ProtocolMessage::Packet(_) => PacketGossip::message_type_id(),
            ProtocolMessage::PacketHashesRequest(_) => PacketHashesRequest::message_type_id(),
            ProtocolMessage::PacketHashesReply(_) => PacketHashesReply::message_type_id(),
            ProtocolMessage::WriterNotification(_) => WriterNotification::message_type_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::test_utils::test_packet;

    #[test]
    fn envelope_serializes_with_bincode() {
        let message = ProtocolMessage::Packet(PacketGossip {
            packet: test_packet(1, 3),
        });
        let bytes = bincode::serialize(&message).unwrap();
        let decoded: ProtocolMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(message, decoded);
        assert_eq!(message.type_id(), "packet.gossip");
    }
}
