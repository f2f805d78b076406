//! Deterministic simulation runner.
//!
//! Single global event queue ordered by (time, priority, sequence). Each
//! entry belongs to one node; processing an entry advances that node's
//! clock, hands it the event, and folds the resulting actions back into
//! the queue. Block persistence goes to a per-node in-memory chain.

use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, trace};
use troika_core::{Action, Event, StateMachine, TimerId};
use troika_node::NodeStateMachine;
use troika_runtime::event_for_message;
use troika_solver::SolverConfig;
use troika_types::{Block, KeyPair, PublicKey, Transaction, TransactionsPacket};

/// Ordering key for queued events.
///
/// Time first, then priority (internal before timers before network),
/// then insertion sequence as the final tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    time: Duration,
    priority: u8,
    seq: u64,
    node: NodeIndex,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority class.
    pub events_by_priority: [u64; 4],
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Blocks persisted across all nodes.
    pub blocks_persisted: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Node index by public key, for point-to-point delivery.
    index_by_key: HashMap<PublicKey, NodeIndex>,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    /// Network simulator.
    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    /// Maps (node, timer_id) -> event_key for removal.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Per-node chain of persisted blocks, in persistence order.
    chains: Vec<Vec<Block>>,

    /// Statistics.
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a simulation with deterministically seeded node keys.
    pub fn new(network_config: NetworkConfig, seed: u64) -> Self {
        Self::with_solver_config(network_config, SolverConfig::default(), seed)
    }

    /// Create a simulation with an explicit solver configuration.
    pub fn with_solver_config(
        network_config: NetworkConfig,
        solver_config: SolverConfig,
        seed: u64,
    ) -> Self {
        let network = SimulatedNetwork::new(network_config.clone());
        let rng = ChaCha8Rng::seed_from_u64(seed);

        let keys: Vec<KeyPair> = (0..network_config.num_nodes)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                KeyPair::from_seed(seed_bytes)
            })
            .collect();

        let mut index_by_key = HashMap::new();
        let mut nodes = Vec::new();
        for (i, key) in keys.into_iter().enumerate() {
            index_by_key.insert(key.public_key(), i as NodeIndex);
            nodes.push(NodeStateMachine::new(key, solver_config.clone()));
        }

        let num_nodes = nodes.len();
        info!(num_nodes, seed, "created simulation runner");

        Self {
            nodes,
            index_by_key,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network,
            rng,
            timers: HashMap::new(),
            chains: vec![Vec::new(); num_nodes],
            stats: SimulationStats::default(),
        }
    }

    /// Get a reference to a node by index.
    pub fn node(&self, index: NodeIndex) -> Option<&NodeStateMachine> {
        self.nodes.get(index as usize)
    }

    /// Public key of a node.
    pub fn public_key(&self, index: NodeIndex) -> Option<PublicKey> {
        self.nodes.get(index as usize).map(|n| n.own_key())
    }

    /// Blocks persisted by a node, in order.
    pub fn chain(&self, index: NodeIndex) -> &[Block] {
        self.chains
            .get(index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get simulation statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Get current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Get a reference to the network.
    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Get a mutable reference to the network for partition/loss configuration.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Submit a client transaction to a node at the current time.
    pub fn submit_transaction(&mut self, node: NodeIndex, tx: Transaction) {
        self.schedule_event(node, self.now, Event::SubmitTransaction { tx });
    }

    /// Submit a pre-built packet to a node at the current time.
    pub fn submit_packet(&mut self, node: NodeIndex, packet: TransactionsPacket) {
        self.schedule_event(node, self.now, Event::SubmitPacket { packet });
    }

    /// Open the first round from one node.
    ///
    /// The chosen node builds a round table over every node's key and its
    /// own stored packets, then announces it to the network. Call after any
    /// initial submissions have been processed so the table carries them.
    pub fn open_first_round(&mut self, from: NodeIndex) {
        let confidants: Vec<PublicKey> = self.nodes.iter().map(|n| n.own_key()).collect();
        let node = &mut self.nodes[from as usize];
        node.set_time(self.now);
        let actions = node.open_first_round(confidants);
        self.stats.actions_generated += actions.len() as u64;
        for action in actions {
            self.process_action(from, action);
        }
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((&key, _)) = self.event_queue.first_key_value() {
            if key.time > end_time {
                debug!(remaining_events = self.event_queue.len(), "time limit reached");
                break;
            }

            let Some((key, event)) = self.event_queue.pop_first() else {
                break;
            };
            self.now = key.time;
            let node_index = key.node;

            trace!(time = ?self.now, node = node_index, event = event.type_name(), "processing event");

            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            let node = &mut self.nodes[node_index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);

            self.stats.actions_generated += actions.len() as u64;

            for action in actions {
                self.process_action(node_index, action);
            }
        }
        self.now = end_time.max(self.now);

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "simulation step complete"
        );
    }

    /// Process an action from a node.
    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                for to in self.network.all_nodes() {
                    if to != from {
                        let event = event_for_message(message.clone());
                        self.try_deliver_message(from, to, event);
                    }
                }
            }

            Action::SendTo { recipient, message } => {
                if let Some(&to) = self.index_by_key.get(&recipient) {
                    let event = event_for_message(message);
                    self.try_deliver_message(from, to, event);
                } else {
                    debug!(%recipient, "recipient unknown to simulation, message dropped");
                }
            }

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&old);
                }
                let fire_time = self.now + duration;
                let key = self.schedule_event(from, fire_time, timer_event(id));
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::EnqueueInternal { event } => {
                self.schedule_event(from, self.now, event);
            }

            Action::PersistBlock { block } => {
                debug!(node = from, sequence = %block.sequence, "block persisted");
                self.chains[from as usize].push(block);
                self.stats.blocks_persisted += 1;
            }
        }
    }

    /// Schedule delivery of a message event, subject to network conditions.
    fn try_deliver_message(&mut self, from: NodeIndex, to: NodeIndex, event: Event) {
        if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            return;
        }
        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            return;
        }
        let latency = self.network.sample_latency(&mut self.rng);
        self.schedule_event(to, self.now + latency, event);
        self.stats.messages_sent += 1;
    }

    /// Insert an event into the queue, returning its key.
    fn schedule_event(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        let key = EventKey {
            time,
            priority: event.priority() as u8,
            seq: self.sequence,
            node,
        };
        self.sequence += 1;
        self.event_queue.insert(key, event);
        key
    }
}

/// The event a timer produces when it fires.
fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::StateExpiry => Event::StateExpiryTimer,
        TimerId::StageRequest => Event::StageRequestTimer,
        TimerId::NeighborsRequest => Event::NeighborsRequestTimer,
        TimerId::RoundDelay => Event::RoundDelayTimer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_orders_by_time_then_priority() {
        let mut runner = SimulationRunner::new(NetworkConfig::default(), 7);
        let t = Duration::from_millis(100);

        // Timer enqueued first, internal event second. At the same timestamp
        // the internal event still runs first: Internal (0) sorts before
        // Timer (1) regardless of insertion order.
        let timer_key = runner.schedule_event(0, t, Event::StateExpiryTimer);
        let internal_key = runner.schedule_event(
            0,
            t,
            Event::RoundPacketsReady {
                round: troika_types::RoundNumber(1),
            },
        );

        assert!(internal_key < timer_key);
        let (&first, _) = runner.event_queue.first_key_value().unwrap();
        assert_eq!(first, internal_key);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut runner = SimulationRunner::new(NetworkConfig::default(), 7);
        runner.process_action(
            0,
            Action::SetTimer {
                id: TimerId::StateExpiry,
                duration: Duration::from_secs(1),
            },
        );
        assert_eq!(runner.event_queue.len(), 1);

        runner.process_action(
            0,
            Action::CancelTimer {
                id: TimerId::StateExpiry,
            },
        );
        assert!(runner.event_queue.is_empty());
        assert_eq!(runner.stats.timers_cancelled, 1);
    }

    #[test]
    fn rearming_a_timer_replaces_the_pending_fire() {
        let mut runner = SimulationRunner::new(NetworkConfig::default(), 7);
        runner.process_action(
            0,
            Action::SetTimer {
                id: TimerId::RoundDelay,
                duration: Duration::from_secs(5),
            },
        );
        runner.process_action(
            0,
            Action::SetTimer {
                id: TimerId::RoundDelay,
                duration: Duration::from_secs(1),
            },
        );
        assert_eq!(runner.event_queue.len(), 1);
        let (&key, _) = runner.event_queue.first_key_value().unwrap();
        assert_eq!(key.time, Duration::from_secs(1));
    }
}
