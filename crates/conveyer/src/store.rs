//! Hash-indexed packet store with bounded round history.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use troika_types::{Characteristic, Hash, RoundNumber, RoundTable, TransactionsPacket};

/// How many archived rounds the history ring keeps before evicting.
pub const DEFAULT_HISTORY_ROUNDS: usize = 100;

/// Everything the conveyer kept from one finished round.
#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    /// The archived round.
    pub round: RoundNumber,
    /// Packets the round's table referenced, keyed by content hash.
    pub packets: HashMap<Hash, TransactionsPacket>,
    /// The characteristic consensus settled on, if the round produced one.
    pub characteristic: Option<Characteristic>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Packets not yet consumed by a round.
    live: HashMap<Hash, TransactionsPacket>,
    /// Finished rounds, oldest first.
    history: VecDeque<RoundSnapshot>,
}

/// Shared packet store.
///
/// Access is wrapped in a single `RwLock`; both the synchronization
/// sub-machine and the block assembler read through it, and round archival
/// writes through it. No lock is held across any await point because callers
/// are synchronous.
#[derive(Debug)]
pub struct Conveyer {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Conveyer {
    /// Create a store keeping `capacity` archived rounds.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }

    /// Add a packet, sealing it if needed. Returns its content hash.
    ///
    /// Resubmitting an already-known packet is a no-op returning the same
    /// hash; the first copy wins.
    pub fn submit(&self, mut packet: TransactionsPacket) -> Hash {
        let hash = packet.seal();
        let mut inner = self.inner.write();
        if inner.live.contains_key(&hash) {
            tracing::debug!(%hash, "duplicate packet ignored");
            return hash;
        }
        tracing::trace!(%hash, transactions = packet.len(), "packet stored");
        inner.live.insert(hash, packet);
        hash
    }

    /// Whether a packet is available in the live store or history.
    pub fn contains(&self, hash: &Hash) -> bool {
        let inner = self.inner.read();
        inner.live.contains_key(hash)
            || inner.history.iter().any(|s| s.packets.contains_key(hash))
    }

    /// Fetch a packet by hash, searching live packets first, then history
    /// from the most recent round backwards.
    pub fn lookup(&self, hash: &Hash) -> Option<TransactionsPacket> {
        let inner = self.inner.read();
        if let Some(packet) = inner.live.get(hash) {
            return Some(packet.clone());
        }
        inner
            .history
            .iter()
            .rev()
            .find_map(|s| s.packets.get(hash).cloned())
    }

    /// Which of a round table's hashes are not yet available locally.
    pub fn missing_hashes(&self, table: &RoundTable) -> Vec<Hash> {
        let inner = self.inner.read();
        table
            .hashes
            .iter()
            .filter(|h| {
                !inner.live.contains_key(h)
                    && !inner.history.iter().any(|s| s.packets.contains_key(h))
            })
            .copied()
            .collect()
    }

    /// Hashes of all live packets, for building the next round's table.
    pub fn live_hashes(&self) -> Vec<Hash> {
        let mut hashes: Vec<Hash> = self.inner.read().live.keys().copied().collect();
        hashes.sort_unstable_by_key(|h| *h.as_bytes());
        hashes
    }

    /// Move a finished round's packets out of the live store into history.
    ///
    /// Hashes the live store no longer holds are skipped; the snapshot keeps
    /// whatever was found. Evicts the oldest snapshot once the ring is full.
    pub fn archive_round(
        &self,
        round: RoundNumber,
        hashes: &[Hash],
        characteristic: Option<Characteristic>,
    ) {
        let mut inner = self.inner.write();
        let mut packets = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(packet) = inner.live.remove(hash) {
                packets.insert(*hash, packet);
            }
        }
        tracing::debug!(
            %round,
            archived = packets.len(),
            live_left = inner.live.len(),
            "round archived"
        );
        inner.history.push_back(RoundSnapshot {
            round,
            packets,
            characteristic,
        });
        while inner.history.len() > self.capacity {
            inner.history.pop_front();
        }
    }

    /// Fetch a packet from one specific archived round.
    ///
    /// Unlike [`lookup`](Self::lookup), this does not fall back to other
    /// rounds or the live store; the snapshot must still be in the ring.
    pub fn find_in_history(&self, round: RoundNumber, hash: &Hash) -> Option<TransactionsPacket> {
        self.inner
            .read()
            .history
            .iter()
            .find(|s| s.round == round)
            .and_then(|s| s.packets.get(hash).cloned())
    }

    /// The characteristic recorded for an archived round, if still in the ring.
    pub fn round_characteristic(&self, round: RoundNumber) -> Option<Characteristic> {
        self.inner
            .read()
            .history
            .iter()
            .find(|s| s.round == round)
            .and_then(|s| s.characteristic.clone())
    }

    /// Number of live (unconsumed) packets.
    pub fn live_len(&self) -> usize {
        self.inner.read().live.len()
    }

    /// Number of rounds currently held in history.
    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }
}

impl Default for Conveyer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_ROUNDS)
    }
}
