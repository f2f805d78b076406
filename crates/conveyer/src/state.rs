//! Packet synchronization sub-state-machine.

use crate::Conveyer;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use troika_core::{Action, Event, SubStateMachine};
use troika_messages::{PacketGossip, PacketHashesReply, PacketHashesRequest, ProtocolMessage};
use troika_types::{
    Hash, PublicKey, RoundNumber, RoundTable, Transaction, TransactionsPacket,
};

/// Drives packet synchronization for the current round.
///
/// When a round table arrives, computes which referenced packets are missing
/// locally, asks peers for them, and emits `RoundPacketsReady` once the set
/// is complete. Also answers other nodes' synchronization requests from the
/// shared store.
pub struct ConveyerState {
    /// Shared packet store.
    conveyer: Arc<Conveyer>,

    /// Our key, included in requests so replies can be addressed to us.
    own_key: PublicKey,

    /// Table of the round we are currently synchronizing for.
    table: Option<RoundTable>,

    /// Hashes still missing for the current round.
    pending: HashSet<Hash>,

    /// Whether readiness was already announced for the current round.
    announced: bool,

    /// Current time.
    now: Duration,
}

impl ConveyerState {
    /// Create a synchronization machine over a shared store.
    pub fn new(conveyer: Arc<Conveyer>, own_key: PublicKey) -> Self {
        Self {
            conveyer,
            own_key,
            table: None,
            pending: HashSet::new(),
            announced: false,
            now: Duration::ZERO,
        }
    }

    /// The shared store.
    pub fn conveyer(&self) -> &Arc<Conveyer> {
        &self.conveyer
    }

    /// Start synchronizing for a new round.
    #[instrument(skip(self, table), fields(round = %table.round))]
    fn on_round_table(&mut self, table: &RoundTable) -> Vec<Action> {
        let missing = self.conveyer.missing_hashes(table);
        let round = table.round;
        self.table = Some(table.clone());
        self.pending = missing.iter().copied().collect();
        self.announced = false;

        if self.pending.is_empty() {
            tracing::debug!(%round, "all round packets already local");
            self.announced = true;
            return vec![Action::EnqueueInternal {
                event: Event::RoundPacketsReady { round },
            }];
        }

        tracing::info!(%round, missing = missing.len(), "requesting missing packets");
        vec![Action::Broadcast {
            message: ProtocolMessage::PacketHashesRequest(PacketHashesRequest {
                round,
                hashes: missing,
                requester: self.own_key,
            }),
        }]
    }

    /// Absorb a packet from any source and re-check readiness.
    fn absorb_packet(&mut self, packet: TransactionsPacket) -> Vec<Action> {
        let hash = self.conveyer.submit(packet);
        self.pending.remove(&hash);
        self.check_ready()
    }

    fn check_ready(&mut self) -> Vec<Action> {
        if self.announced || !self.pending.is_empty() {
            return Vec::new();
        }
        let Some(table) = &self.table else {
            return Vec::new();
        };
        self.announced = true;
        tracing::debug!(round = %table.round, "round packets complete");
        vec![Action::EnqueueInternal {
            event: Event::RoundPacketsReady { round: table.round },
        }]
    }

    /// Answer a peer's request for packets, from live store and history.
    fn on_hashes_request(
        &self,
        round: RoundNumber,
        hashes: &[Hash],
        requester: &PublicKey,
    ) -> Vec<Action> {
        if *requester == self.own_key {
            return Vec::new();
        }
        let packets: Vec<TransactionsPacket> =
            hashes.iter().filter_map(|h| self.conveyer.lookup(h)).collect();
        if packets.is_empty() {
            return Vec::new();
        }
        tracing::debug!(%round, found = packets.len(), of = hashes.len(), "answering packet request");
        vec![Action::SendTo {
            recipient: *requester,
            message: ProtocolMessage::PacketHashesReply(PacketHashesReply { round, packets }),
        }]
    }

    /// Store a client submission and gossip it onward.
    fn on_submit_packet(&mut self, packet: TransactionsPacket) -> Vec<Action> {
        let mut packet = packet;
        packet.seal();
        let mut actions = vec![Action::Broadcast {
            message: ProtocolMessage::Packet(PacketGossip {
                packet: packet.clone(),
            }),
        }];
        actions.extend(self.absorb_packet(packet));
        actions
    }

    fn on_submit_transaction(&mut self, tx: &Transaction) -> Vec<Action> {
        if !tx.verify_signature() {
            tracing::warn!("rejecting client transaction with bad signature");
            return Vec::new();
        }
        let packet = TransactionsPacket::from_transactions(vec![tx.clone()]);
        self.on_submit_packet(packet)
    }
}

impl SubStateMachine for ConveyerState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        match event {
            Event::RoundTableReceived { table } => Some(self.on_round_table(table)),
            Event::PacketGossipReceived { packet } => Some(self.absorb_packet(packet.clone())),
            Event::PacketHashesReplyReceived { packets, .. } => {
                let mut actions = Vec::new();
                for packet in packets {
                    actions.extend(self.absorb_packet(packet.clone()));
                }
                Some(actions)
            }
            Event::PacketHashesRequestReceived {
                round,
                hashes,
                requester,
            } => Some(self.on_hashes_request(*round, hashes, requester)),
            Event::SubmitPacket { packet } => Some(self.on_submit_packet(packet.clone())),
            Event::SubmitTransaction { tx } => Some(self.on_submit_transaction(tx)),
            _ => None,
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::test_utils::{test_keypair, test_packet};

    fn state() -> ConveyerState {
        ConveyerState::new(
            Arc::new(Conveyer::default()),
            test_keypair(0).public_key(),
        )
    }

    fn table_with(hashes: Vec<Hash>) -> RoundTable {
        RoundTable {
            round: RoundNumber(1),
            timestamp: 0,
            confidants: (0..3).map(|i| test_keypair(i).public_key()).collect(),
            hashes,
        }
    }

    #[test]
    fn complete_table_is_ready_immediately() {
        let mut state = state();
        let hash = state.conveyer().submit(test_packet(1, 2));
        let actions = state.on_round_table(&table_with(vec![hash]));
        assert!(matches!(
            actions.as_slice(),
            [Action::EnqueueInternal {
                event: Event::RoundPacketsReady { .. }
            }]
        ));
    }

    #[test]
    fn missing_packets_trigger_request_then_ready_on_reply() {
        let mut state = state();
        let packet = test_packet(1, 2);
        let hash = packet.hash().unwrap();

        let actions = state.on_round_table(&table_with(vec![hash]));
        assert!(matches!(
            actions.as_slice(),
            [Action::Broadcast {
                message: ProtocolMessage::PacketHashesRequest(_)
            }]
        ));

        let actions = state.absorb_packet(packet);
        assert!(matches!(
            actions.as_slice(),
            [Action::EnqueueInternal {
                event: Event::RoundPacketsReady { .. }
            }]
        ));
    }

    #[test]
    fn readiness_is_announced_once() {
        let mut state = state();
        let packet = test_packet(1, 2);
        let hash = packet.hash().unwrap();
        state.on_round_table(&table_with(vec![hash]));
        assert_eq!(state.absorb_packet(packet.clone()).len(), 1);
        assert!(state.absorb_packet(packet).is_empty());
    }

    #[test]
    fn answers_requests_from_store() {
        let mut state = state();
        let hash = state.conveyer().submit(test_packet(1, 2));
        let requester = test_keypair(9).public_key();
        let actions = state.on_hashes_request(RoundNumber(1), &[hash], &requester);
        match actions.as_slice() {
            [Action::SendTo { recipient, message }] => {
                assert_eq!(*recipient, requester);
                match message {
                    ProtocolMessage::PacketHashesReply(reply) => {
                        assert_eq!(reply.packets.len(), 1)
                    }
                    other => panic!("unexpected message {other:?}"),
                }
            }
            other => panic!("unexpected actions {other:?}"),
        }
    }
}
