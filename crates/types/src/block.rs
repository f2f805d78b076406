//! Block and deferred-block types.

use crate::{Hash, PublicKey, RoundNumber, SenderIndex, Signature, Transaction};
use serde::{Deserialize, Serialize};

/// Metadata fixed before characteristic application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetaInfo {
    /// Sequence number of the block being assembled.
    pub sequence: RoundNumber,
    /// Wall-clock timestamp in milliseconds, taken by the proposing round.
    pub timestamp: u64,
    /// Hash of the previous block.
    pub previous_hash: Hash,
    /// Key of the elected writer.
    pub writer: PublicKey,
    /// Writing-queue positions per confidant; INVALID marks liars/absentees.
    pub real_trusted: Vec<SenderIndex>,
}

/// An assembled block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Chain position, equal to the producing round number.
    pub sequence: RoundNumber,
    /// Hash of the previous block (ZERO for the first block).
    pub previous_hash: Hash,
    /// Assembly timestamp in milliseconds.
    pub timestamp: u64,
    /// Key of the writer that produced the block.
    pub writer: PublicKey,
    /// The round's trusted set, in confidant-index order.
    pub confidants: Vec<PublicKey>,
    /// Writing-queue positions per confidant; INVALID marks excluded nodes.
    pub real_trusted: Vec<SenderIndex>,
    /// Transactions selected by the round's characteristic, in order.
    pub transactions: Vec<Transaction>,
    /// Confirmation signatures keyed by confidant index.
    ///
    /// Excluded from the block hash; accumulated after assembly.
    pub signatures: Vec<(SenderIndex, Signature)>,
}

impl Block {
    /// Content hash over everything except the confirmation signatures.
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.sequence.0.to_le_bytes());
        bytes.extend_from_slice(self.previous_hash.as_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(self.writer.as_bytes());
        for confidant in &self.confidants {
            bytes.extend_from_slice(confidant.as_bytes());
        }
        for index in &self.real_trusted {
            bytes.push(index.0);
        }
        for tx in &self.transactions {
            bytes.extend_from_slice(&tx.content_bytes());
        }
        Hash::digest(&bytes)
    }

    /// Number of confidants not marked INVALID in the real-trusted mask.
    pub fn active_trusted_count(&self) -> usize {
        self.real_trusted.iter().filter(|i| !i.is_invalid()).count()
    }
}

/// A block built speculatively before confirmation signatures are collected.
///
/// Mutated in place as confirmations arrive; handed to storage once the
/// threshold is met; dropped without persistence if the round is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredBlock {
    /// The assembled block.
    pub block: Block,
    /// Assembly iteration; > 0 when the round was re-assembled after a
    /// trust-composition change.
    pub iteration: u8,
}

impl DeferredBlock {
    /// Wrap a freshly assembled block (iteration 0).
    pub fn new(block: Block) -> Self {
        Self {
            block,
            iteration: 0,
        }
    }

    /// Record a confirmation signature from a confidant.
    ///
    /// Duplicate senders are ignored; the first signature wins.
    pub fn add_signature(&mut self, sender: SenderIndex, signature: Signature) {
        if self.block.signatures.iter().any(|(s, _)| *s == sender) {
            return;
        }
        self.block.signatures.push((sender, signature));
    }

    /// Whether confirmations satisfy the threshold: more than half of the
    /// active trusted count.
    pub fn is_confirmed(&self) -> bool {
        let active = self.block.active_trusted_count();
        active > 0 && self.block.signatures.len() > active / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_keypair, test_transaction};

    fn block() -> Block {
        Block {
            sequence: RoundNumber(1),
            previous_hash: Hash::ZERO,
            timestamp: 1_700_000_000_000,
            writer: test_keypair(0).public_key(),
            confidants: (0..4).map(|i| test_keypair(i).public_key()).collect(),
            real_trusted: vec![
                SenderIndex(0),
                SenderIndex(1),
                SenderIndex(2),
                SenderIndex(3),
            ],
            transactions: vec![test_transaction(1, 0)],
            signatures: vec![],
        }
    }

    #[test]
    fn hash_ignores_confirmation_signatures() {
        let a = block();
        let mut b = block();
        b.signatures
            .push((SenderIndex(0), test_keypair(0).sign(b"x")));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn confirmation_threshold_is_majority_of_active() {
        let mut deferred = DeferredBlock::new(block());
        assert!(!deferred.is_confirmed());
        deferred.add_signature(SenderIndex(0), Signature::zero());
        deferred.add_signature(SenderIndex(1), Signature::zero());
        assert!(!deferred.is_confirmed());
        deferred.add_signature(SenderIndex(2), Signature::zero());
        assert!(deferred.is_confirmed());
    }

    #[test]
    fn duplicate_confirmations_are_ignored() {
        let mut deferred = DeferredBlock::new(block());
        deferred.add_signature(SenderIndex(0), Signature::zero());
        deferred.add_signature(SenderIndex(0), Signature::zero());
        assert_eq!(deferred.block.signatures.len(), 1);
    }
}
