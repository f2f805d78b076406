//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A round number.
///
/// Monotonically increasing, unique per chain height. Round N produces the
/// block with sequence N.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RoundNumber(pub u64);

impl RoundNumber {
    /// The round that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a trusted node within the round's confidant list.
///
/// Bounded by the actual trusted-set size N at insertion time; the sentinel
/// [`SenderIndex::INVALID`] marks liars and absentees in real-trusted masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SenderIndex(pub u8);

impl SenderIndex {
    /// Sentinel marking an invalid or excluded confidant slot.
    pub const INVALID: SenderIndex = SenderIndex(u8::MAX);

    /// Whether this index is the invalid sentinel.
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }

    /// Usize view for slice indexing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SenderIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "invalid")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
