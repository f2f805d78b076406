//! Responses to point-to-point requests.

mod packet_hashes;

pub use packet_hashes::PacketHashesReply;
