//! Stage vote gossip messages.

use crate::NetworkMessage;
use serde::{Deserialize, Serialize};
use troika_types::{RoundNumber, StageOne, StageThree, StageTwo};

/// Broadcasts a confidant's StageOne vote to the whole trusted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOneGossip {
    /// Round the vote belongs to.
    pub round: RoundNumber,
    /// The vote payload.
    pub stage: StageOne,
}

impl NetworkMessage for StageOneGossip {
    fn message_type_id() -> &'static str {
        "stage_one.gossip"
    }
}

/// Broadcasts a confidant's StageTwo vote to the whole trusted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTwoGossip {
    /// Round the vote belongs to.
    pub round: RoundNumber,
    /// The vote payload.
    pub stage: StageTwo,
}

impl NetworkMessage for StageTwoGossip {
    fn message_type_id() -> &'static str {
        "stage_two.gossip"
    }
}

/// Broadcasts a confidant's StageThree verdict to the whole trusted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageThreeGossip {
    /// Round the verdict belongs to.
    pub round: RoundNumber,
    /// The verdict payload.
    pub stage: StageThree,
}

impl NetworkMessage for StageThreeGossip {
    fn message_type_id() -> &'static str {
        "stage_three.gossip"
    }
}
