//! Network messages for the consensus protocol.

pub mod gossip;
pub mod request;
pub mod response;

mod protocol;

// Re-export commonly used types
pub use gossip::{
    PacketGossip, RoundTableGossip, StageOneGossip, StageThreeGossip, StageTwoGossip,
    WriterNotification,
};
pub use protocol::ProtocolMessage;
pub use request::{PacketHashesRequest, StageRequest};
pub use response::PacketHashesReply;

/// A message that can travel over the node-to-node wire.
pub trait NetworkMessage {
    /// Stable identifier used in logs and metrics.
    fn message_type_id() -> &'static str;
}
