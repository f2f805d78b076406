//! Round table.

use crate::{Hash, PublicKey, RoundNumber, SenderIndex};
use serde::{Deserialize, Serialize};

/// Minimum trusted-set size for a usable round.
pub const MIN_CONFIDANTS: usize = 3;

/// Per-round agreement context, fixed when the round starts.
///
/// Immutable once created; superseded by the next round's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTable {
    /// The round this table describes.
    pub round: RoundNumber,
    /// Writer-assigned round timestamp in milliseconds.
    ///
    /// Copied into the assembled block by every confidant, so independently
    /// assembled blocks hash identically.
    pub timestamp: u64,
    /// Trusted-node public keys for the round, in confidant-index order.
    pub confidants: Vec<PublicKey>,
    /// Ordered packet hashes that the round's block will be built from.
    pub hashes: Vec<Hash>,
}

impl RoundTable {
    /// Basic structural validity: enough confidants to vote.
    pub fn is_valid(&self) -> bool {
        self.confidants.len() >= MIN_CONFIDANTS && self.confidants.len() <= u8::MAX as usize
    }

    /// Trusted-set size N.
    pub fn confidant_count(&self) -> usize {
        self.confidants.len()
    }

    /// The confidant index of a public key, if it is in the trusted set.
    pub fn confidant_index(&self, key: &PublicKey) -> Option<SenderIndex> {
        self.confidants
            .iter()
            .position(|c| c == key)
            .map(|i| SenderIndex(i as u8))
    }

    /// The key at a confidant index, rejecting out-of-range indices.
    pub fn confidant_key(&self, index: SenderIndex) -> Option<&PublicKey> {
        self.confidants.get(index.as_usize())
    }
}
