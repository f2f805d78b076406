//! Event types for the deterministic state machine.

use troika_types::{
    Hash, PublicKey, RoundNumber, RoundTable, SenderIndex, StageKind, StageOne, StageThree,
    StageTwo, Transaction, TransactionsPacket,
};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other nodes.
    Network = 2,

    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The current consensus state outlived its allowance.
    StateExpiryTimer,

    /// First-tier escalation: re-request missing stage votes point-to-point.
    StageRequestTimer,

    /// Second-tier escalation: ask all neighbors for missing stage votes.
    NeighborsRequestTimer,

    /// A waiting node's writing-queue slot came up without a confirmed block.
    RoundDelayTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - Rounds (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received the next round's table from the previous writer.
    RoundTableReceived { table: RoundTable },

    /// Received a writer announcement for a round.
    WriterNotificationReceived {
        round: RoundNumber,
        writer: PublicKey,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - Stages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received a StageOne vote.
    ///
    /// Sender identity comes from `stage.sender` plus signature verification
    /// against the round table.
    StageOneReceived { round: RoundNumber, stage: StageOne },

    /// Received a StageTwo vote.
    StageTwoReceived { round: RoundNumber, stage: StageTwo },

    /// Received a StageThree verdict.
    StageThreeReceived {
        round: RoundNumber,
        stage: StageThree,
    },

    /// A peer asked for a stage vote it is missing.
    StageRequestReceived {
        round: RoundNumber,
        kind: StageKind,
        from: SenderIndex,
        required: SenderIndex,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - Packets (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received a gossiped transaction packet.
    PacketGossipReceived { packet: TransactionsPacket },

    /// A peer asked for packets it is missing for a round.
    PacketHashesRequestReceived {
        round: RoundNumber,
        hashes: Vec<Hash>,
        requester: PublicKey,
    },

    /// A peer delivered packets we asked for.
    PacketHashesReplyReceived {
        round: RoundNumber,
        packets: Vec<TransactionsPacket>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// Every packet the current round table references is available locally.
    RoundPacketsReady { round: RoundNumber },

    /// The round failed irrecoverably and consensus restarts from scratch.
    ConsensusAbandoned { round: RoundNumber },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A client submitted a single transaction.
    SubmitTransaction { tx: Transaction },

    /// A client submitted a prepared packet.
    SubmitPacket { packet: TransactionsPacket },
}

impl Event {
    /// Get the priority of this event for ordering at the same timestamp.
    pub fn priority(&self) -> EventPriority {
        match self {
            // Internal events (processed first at same time)
            Event::RoundPacketsReady { .. } | Event::ConsensusAbandoned { .. } => {
                EventPriority::Internal
            }

            // Timer events
            Event::StateExpiryTimer
            | Event::StageRequestTimer
            | Event::NeighborsRequestTimer
            | Event::RoundDelayTimer => EventPriority::Timer,

            // Network events
            Event::RoundTableReceived { .. }
            | Event::WriterNotificationReceived { .. }
            | Event::StageOneReceived { .. }
            | Event::StageTwoReceived { .. }
            | Event::StageThreeReceived { .. }
            | Event::StageRequestReceived { .. }
            | Event::PacketGossipReceived { .. }
            | Event::PacketHashesRequestReceived { .. }
            | Event::PacketHashesReplyReceived { .. } => EventPriority::Network,

            // Client events
            Event::SubmitTransaction { .. } | Event::SubmitPacket { .. } => EventPriority::Client,
        }
    }

    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            // Timers
            Event::StateExpiryTimer => "StateExpiryTimer",
            Event::StageRequestTimer => "StageRequestTimer",
            Event::NeighborsRequestTimer => "NeighborsRequestTimer",
            Event::RoundDelayTimer => "RoundDelayTimer",

            // Network - Rounds
            Event::RoundTableReceived { .. } => "RoundTableReceived",
            Event::WriterNotificationReceived { .. } => "WriterNotificationReceived",

            // Network - Stages
            Event::StageOneReceived { .. } => "StageOneReceived",
            Event::StageTwoReceived { .. } => "StageTwoReceived",
            Event::StageThreeReceived { .. } => "StageThreeReceived",
            Event::StageRequestReceived { .. } => "StageRequestReceived",

            // Network - Packets
            Event::PacketGossipReceived { .. } => "PacketGossipReceived",
            Event::PacketHashesRequestReceived { .. } => "PacketHashesRequestReceived",
            Event::PacketHashesReplyReceived { .. } => "PacketHashesReplyReceived",

            // Internal
            Event::RoundPacketsReady { .. } => "RoundPacketsReady",
            Event::ConsensusAbandoned { .. } => "ConsensusAbandoned",

            // Client
            Event::SubmitTransaction { .. } => "SubmitTransaction",
            Event::SubmitPacket { .. } => "SubmitPacket",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_events_outrank_timers_and_network() {
        assert!(EventPriority::Internal < EventPriority::Timer);
        assert!(EventPriority::Timer < EventPriority::Network);
        assert!(EventPriority::Network < EventPriority::Client);

        let ready = Event::RoundPacketsReady {
            round: troika_types::RoundNumber(1),
        };
        assert_eq!(ready.priority(), EventPriority::Internal);
        assert_eq!(Event::StateExpiryTimer.priority(), EventPriority::Timer);
    }
}
