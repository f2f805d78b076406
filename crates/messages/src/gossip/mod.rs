//! Broadcast messages.

mod packet;
mod round_table;
mod stage;

pub use packet::PacketGossip;
pub use round_table::{RoundTableGossip, WriterNotification};
pub use stage::{StageOneGossip, StageThreeGossip, StageTwoGossip};
