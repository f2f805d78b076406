//! Inclusion mask over a round's ordered transaction sequence.

use crate::{Hash, RoundNumber};
use serde::{Deserialize, Serialize};

/// A bitmask selecting which transactions of a round enter the block.
///
/// One byte per transaction position: 1 = included, 0 = excluded. The mask
/// covers the concatenation of the round's packets in round-table order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Characteristic {
    /// Per-position inclusion flags.
    pub mask: Vec<u8>,
}

impl Characteristic {
    /// Build from per-position flags.
    pub fn new(mask: Vec<u8>) -> Self {
        Self { mask }
    }

    /// Number of transaction positions covered.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// Whether the mask covers no positions.
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// Whether the transaction at `position` is selected.
    ///
    /// Positions beyond the mask length count as excluded; a short mask
    /// represents trailing exclusions.
    pub fn is_included(&self, position: usize) -> bool {
        self.mask.get(position).copied().unwrap_or(0) != 0
    }

    /// Number of selected positions.
    pub fn included_count(&self) -> usize {
        self.mask.iter().filter(|&&b| b != 0).count()
    }

    /// Digest over the round number and mask bytes.
    ///
    /// This is the value proposed in StageOne and compared across nodes for
    /// liar detection.
    pub fn digest(&self, round: RoundNumber) -> Hash {
        let mut bytes = Vec::with_capacity(8 + self.mask.len());
        bytes.extend_from_slice(&round.0.to_le_bytes());
        bytes.extend_from_slice(&self.mask);
        Hash::digest(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_mask_excludes_trailing_positions() {
        let c = Characteristic::new(vec![1, 0, 1]);
        assert!(c.is_included(0));
        assert!(!c.is_included(1));
        assert!(c.is_included(2));
        assert!(!c.is_included(3));
        assert_eq!(c.included_count(), 2);
    }

    #[test]
    fn digest_depends_on_round_and_mask() {
        let c = Characteristic::new(vec![1, 1]);
        assert_ne!(c.digest(RoundNumber(1)), c.digest(RoundNumber(2)));
        assert_ne!(
            c.digest(RoundNumber(1)),
            Characteristic::new(vec![1, 0]).digest(RoundNumber(1))
        );
    }
}
