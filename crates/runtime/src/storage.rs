//! Chain storage.

use std::collections::HashMap;
use troika_types::{Block, Hash, RoundNumber};

/// Persistent block storage, as seen by the runner.
///
/// Backends are expected to be durable in production; the in-memory
/// implementation exists for tests and local runs.
pub trait BlockStore: Send {
    /// Sequence of the highest stored block, if any.
    fn last_sequence(&self) -> Option<RoundNumber>;

    /// Hash of the highest stored block, if any.
    fn last_hash(&self) -> Option<Hash>;

    /// Fetch a block by sequence.
    fn block_by_sequence(&self, sequence: RoundNumber) -> Option<Block>;

    /// Store a confirmed block.
    fn put_block(&mut self, block: Block);
}

/// In-memory block store.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: HashMap<RoundNumber, Block>,
    last: Option<(RoundNumber, Hash)>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn last_sequence(&self) -> Option<RoundNumber> {
        self.last.map(|(sequence, _)| sequence)
    }

    fn last_hash(&self) -> Option<Hash> {
        self.last.map(|(_, hash)| hash)
    }

    fn block_by_sequence(&self, sequence: RoundNumber) -> Option<Block> {
        self.blocks.get(&sequence).cloned()
    }

    fn put_block(&mut self, block: Block) {
        let sequence = block.sequence;
        let hash = block.hash();
        if self.last.map_or(true, |(last, _)| sequence > last) {
            self.last = Some((sequence, hash));
        }
        self.blocks.insert(sequence, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::test_utils::test_keypair;

    fn block(sequence: u64) -> Block {
        Block {
            sequence: RoundNumber(sequence),
            previous_hash: Hash::ZERO,
            timestamp: sequence,
            writer: test_keypair(0).public_key(),
            confidants: vec![],
            real_trusted: vec![],
            transactions: vec![],
            signatures: vec![],
        }
    }

    #[test]
    fn tracks_highest_sequence() {
        let mut store = MemoryBlockStore::new();
        store.put_block(block(2));
        store.put_block(block(1));
        assert_eq!(store.last_sequence(), Some(RoundNumber(2)));
        assert_eq!(store.len(), 2);
        assert!(store.block_by_sequence(RoundNumber(1)).is_some());
    }
}
