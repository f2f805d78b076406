//! End-to-end consensus scenarios over the simulated network.

use std::time::Duration;
use troika_simulation::{NetworkConfig, SimulationRunner};
use troika_types::test_utils::test_transaction;
use troika_types::RoundNumber;

const GOSSIP_WARMUP: Duration = Duration::from_millis(500);

#[test]
fn four_nodes_confirm_the_same_first_block() {
    let mut sim = SimulationRunner::new(NetworkConfig::default(), 42);

    for i in 0..3u8 {
        sim.submit_transaction(0, test_transaction(10 + i, i as u64));
    }
    // Let packet gossip reach every node before the round opens.
    sim.run_until(GOSSIP_WARMUP);
    sim.open_first_round(0);
    sim.run_until(Duration::from_secs(10));

    let reference = sim.chain(0).first().cloned().expect("node 0 persisted a block");
    assert_eq!(reference.sequence, RoundNumber(1));
    assert_eq!(reference.transactions.len(), 3);

    for node in 1..4 {
        let chain = sim.chain(node);
        let first = chain.first().unwrap_or_else(|| panic!("node {node} persisted nothing"));
        assert_eq!(first.hash(), reference.hash(), "node {node} diverged");
    }
}

#[test]
fn empty_rounds_keep_the_chain_advancing() {
    let mut sim = SimulationRunner::new(NetworkConfig::default(), 5);

    sim.open_first_round(0);
    sim.run_until(Duration::from_secs(8));

    let chain = sim.chain(0);
    assert!(
        chain.len() >= 3,
        "expected several rounds in 8s, got {}",
        chain.len()
    );
    for (i, block) in chain.iter().enumerate() {
        assert_eq!(block.sequence, RoundNumber(i as u64 + 1));
        assert!(block.transactions.is_empty());
        if i > 0 {
            assert_eq!(block.previous_hash, chain[i - 1].hash());
        }
    }

    // Every node agrees on the shared prefix.
    let shortest = (0..4).map(|n| sim.chain(n).len()).min().unwrap_or(0);
    assert!(shortest >= 1);
    for node in 1..4 {
        for i in 0..shortest.min(sim.chain(node).len()) {
            assert_eq!(sim.chain(node)[i].hash(), chain[i].hash());
        }
    }
}

#[test]
fn same_seed_replays_identically() {
    let run = |seed: u64| {
        let mut sim = SimulationRunner::new(NetworkConfig::default(), seed);
        for i in 0..2u8 {
            sim.submit_transaction(i as u32, test_transaction(20 + i, 0));
        }
        sim.run_until(GOSSIP_WARMUP);
        sim.open_first_round(0);
        sim.run_until(Duration::from_secs(6));
        let hashes: Vec<_> = sim.chain(0).iter().map(|b| b.hash()).collect();
        (hashes, sim.stats().events_processed)
    };

    let (chain_a, events_a) = run(7);
    let (chain_b, events_b) = run(7);
    assert!(!chain_a.is_empty());
    assert_eq!(chain_a, chain_b);
    assert_eq!(events_a, events_b);
}

#[test]
fn isolated_node_recovers_packets_through_hash_sync() {
    let mut sim = SimulationRunner::new(NetworkConfig::default(), 9);

    // Node 3 misses the packet gossip entirely.
    sim.network_mut().isolate_node(3);
    sim.submit_transaction(0, test_transaction(30, 0));
    sim.run_until(GOSSIP_WARMUP);
    assert!(sim.stats().messages_dropped_partition > 0);

    // Connectivity returns before the round opens; node 3 only learns the
    // packet hash from the round table and must fetch the body.
    sim.network_mut().heal_all();
    sim.open_first_round(0);
    sim.run_until(Duration::from_secs(10));

    let reference = sim.chain(0).first().cloned().expect("node 0 persisted a block");
    assert_eq!(reference.transactions.len(), 1);

    let late = sim.chain(3).first().expect("node 3 persisted a block");
    assert_eq!(late.hash(), reference.hash());
    assert!(sim.node(3).is_some_and(|n| n.last_sequence() >= RoundNumber(1)));
}
