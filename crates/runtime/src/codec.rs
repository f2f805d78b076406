//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][payload: bincode-encoded ProtocolMessage]
//! ```
//!
//! The envelope enum carries the message type, so no topic dispatch is
//! needed; a single decode covers every protocol message.

use thiserror::Error;
use troika_core::Event;
use troika_messages::ProtocolMessage;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("message too short")]
    MessageTooShort,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Encode a protocol message to wire format.
pub fn encode_message(message: &ProtocolMessage) -> Result<Vec<u8>, CodecError> {
    let payload =
        bincode::serialize(message).map_err(|e| CodecError::Encode(format!("{e:?}")))?;
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

/// Decode wire bytes into the event the state machine consumes.
pub fn decode_message(data: &[u8]) -> Result<Event, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    let message: ProtocolMessage =
        bincode::deserialize(&data[1..]).map_err(|e| CodecError::Decode(format!("{e:?}")))?;
    Ok(event_for_message(message))
}

/// The event a received protocol message turns into.
pub fn event_for_message(message: ProtocolMessage) -> Event {
    match message {
        ProtocolMessage::RoundTable(gossip) => Event::RoundTableReceived {
            table: gossip.table,
        },
        ProtocolMessage::StageOne(gossip) => Event::StageOneReceived {
            round: gossip.round,
            stage: gossip.stage,
        },
        ProtocolMessage::StageTwo(gossip) => Event::StageTwoReceived {
            round: gossip.round,
            stage: gossip.stage,
        },
        ProtocolMessage::StageThree(gossip) => Event::StageThreeReceived {
            round: gossip.round,
            stage: gossip.stage,
        },
        ProtocolMessage::StageRequest(request) => Event::StageRequestReceived {
            round: request.round,
            kind: request.kind,
            from: request.from,
            required: request.required,
        },
        ProtocolMessage::Packet(gossip) => Event::PacketGossipReceived {
            packet: gossip.packet,
        },
        ProtocolMessage::PacketHashesRequest(request) => Event::PacketHashesRequestReceived {
            round: request.round,
            hashes: request.hashes,
            requester: request.requester,
        },
        ProtocolMessage::PacketHashesReply(reply) => Event::PacketHashesReplyReceived {
            round: reply.round,
            packets: reply.packets,
        },
        ProtocolMessage::WriterNotification(notification) => Event::WriterNotificationReceived {
            round: notification.round,
            writer: notification.writer,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_messages::PacketGossip;
    use troika_types::test_utils::test_packet;

    #[test]
    fn wire_roundtrip_yields_the_matching_event() {
        let message = ProtocolMessage::Packet(PacketGossip {
            packet: test_packet(1, 2),
        });
        let bytes = encode_message(&message).unwrap();
        assert_eq!(bytes[0], WIRE_VERSION);
        let event = decode_message(&bytes).unwrap();
        assert!(matches!(event, Event::PacketGossipReceived { .. }));
    }

    #[test]
    fn bad_version_and_empty_input_are_rejected() {
        assert!(matches!(
            decode_message(&[]),
            Err(CodecError::MessageTooShort)
        ));
        assert!(matches!(
            decode_message(&[9, 1, 2, 3]),
            Err(CodecError::UnknownVersion(9))
        ));
    }
}
