//! Point-to-point requests.

mod packet_hashes;
mod stage;

pub use packet_hashes::PacketHashesRequest;
pub use stage::StageRequest;
