//! Node state machine.

use std::sync::Arc;
use std::time::Duration;
use troika_conveyer::{Conveyer, ConveyerState};
use troika_core::{Action, Event, StateMachine, SubStateMachine};
use troika_solver::{SolverConfig, SolverState, StateKind};
use troika_types::{Hash, KeyPair, PublicKey, RoundNumber};

/// Combined node state machine.
///
/// Composes packet synchronization and the consensus driver into a single
/// state machine. Every event is offered to both sub-machines: the conveyer
/// keeps the packet store current and the solver advances the round, so an
/// event such as `RoundTableReceived` legitimately concerns both.
pub struct NodeStateMachine {
    /// This node's public key.
    own_key: PublicKey,

    /// Packet store and synchronization protocol.
    conveyer: ConveyerState,

    /// Consensus driver.
    solver: SolverState,

    /// Current time.
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("own_key", &self.own_key)
            .field("state", &self.solver.state_kind().name())
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Create a node state machine and start its solver.
    ///
    /// # Arguments
    ///
    /// * `keypair` - Key for signing stage votes
    /// * `config` - Solver configuration
    pub fn new(keypair: KeyPair, config: SolverConfig) -> Self {
        let own_key = keypair.public_key();
        let conveyer = Arc::new(Conveyer::default());
        let conveyer_state = ConveyerState::new(conveyer.clone(), own_key);
        let mut solver = SolverState::new(keypair, config, conveyer);
        solver.start();
        Self {
            own_key,
            conveyer: conveyer_state,
            solver,
            now: Duration::ZERO,
        }
    }

    /// This node's public key.
    pub fn own_key(&self) -> PublicKey {
        self.own_key
    }

    /// The solver's current state.
    pub fn state_kind(&self) -> StateKind {
        self.solver.state_kind()
    }

    /// Sequence of the last persisted block.
    pub fn last_sequence(&self) -> RoundNumber {
        self.solver.last_sequence()
    }

    /// Hash of the last persisted block.
    pub fn last_hash(&self) -> Hash {
        self.solver.last_hash()
    }

    /// The shared packet store.
    pub fn conveyer(&self) -> &Arc<Conveyer> {
        self.conveyer.conveyer()
    }

    /// Bootstrap a fresh network by opening round 1 from this node.
    pub fn open_first_round(&mut self, confidants: Vec<PublicKey>) -> Vec<Action> {
        self.solver.open_first_round(confidants)
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        tracing::trace!(event = event.type_name(), "handling event");
        let mut actions = Vec::new();
        if let Some(mut conveyer_actions) = self.conveyer.try_handle(&event) {
            actions.append(&mut conveyer_actions);
        }
        if let Some(mut solver_actions) = self.solver.try_handle(&event) {
            actions.append(&mut solver_actions);
        }
        actions
    }
}

impl NodeStateMachine {
    /// Advance the node's notion of the current time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.conveyer.set_time(now);
        self.solver.set_time(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_messages::ProtocolMessage;
    use troika_types::test_utils::{test_keypair, test_transaction};

    fn node(seed: u8) -> NodeStateMachine {
        let config = SolverConfig {
            timeouts_enabled: false,
            ..SolverConfig::default()
        };
        NodeStateMachine::new(test_keypair(seed), config)
    }

    #[test]
    fn client_submission_is_stored_and_gossiped() {
        let mut node = node(0);
        let actions = node.handle(Event::SubmitTransaction {
            tx: test_transaction(1, 0),
        });
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: ProtocolMessage::Packet(_)
            }
        )));
        assert_eq!(node.conveyer().live_len(), 1);
    }

    #[test]
    fn round_table_reaches_both_sub_machines() {
        let mut node = node(0);
        node.handle(Event::SubmitTransaction {
            tx: test_transaction(1, 0),
        });
        let confidants = (0..4).map(|i| test_keypair(i).public_key()).collect();
        let actions = node.open_first_round(confidants);
        let table = actions
            .iter()
            .find_map(|a| match a {
                Action::EnqueueInternal {
                    event: Event::RoundTableReceived { table },
                } => Some(table.clone()),
                _ => None,
            })
            .expect("first round enqueued for self");

        let actions = node.handle(Event::RoundTableReceived { table });
        // Conveyer: packets already local, readiness announced.
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::RoundPacketsReady { .. }
            }
        )));
        // Solver: entered the round as trusted.
        assert_eq!(node.state_kind(), StateKind::TrustedStage1);
    }
}
