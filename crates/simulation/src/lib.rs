//! Deterministic simulation harness for multi-node consensus.
//!
//! Runs a set of [`NodeStateMachine`]s against a virtual clock and a
//! simulated network. Messages travel with configurable latency, jitter,
//! packet loss, and partitions; timers are queue entries rather than tasks.
//! Given the same seed, a simulation replays identically.
//!
//! [`NodeStateMachine`]: troika_node::NodeStateMachine

pub mod network;
pub mod runner;

/// Index of a node within the simulation.
pub type NodeIndex = u32;

pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationRunner, SimulationStats};
