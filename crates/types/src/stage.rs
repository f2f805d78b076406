//! Per-stage vote payloads.

use crate::{Hash, PublicKey, SenderIndex, Signature};
use serde::{Deserialize, Serialize};

/// Which of the three voting stages a message or request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    One,
    Two,
    Three,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::One => write!(f, "stage-1"),
            StageKind::Two => write!(f, "stage-2"),
            StageKind::Three => write!(f, "stage-3"),
        }
    }
}

/// A confidant's characteristic proposal.
///
/// Carries the digest of the locally computed characteristic and the set of
/// nodes the sender proposes as trusted for the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOne {
    /// Confidant index of the sender within the current round table.
    pub sender: SenderIndex,
    /// Digest of the sender's characteristic, bound to the round number.
    pub hash: Hash,
    /// Proposed trusted candidates for the next round.
    ///
    /// May include keys outside the current confidant set, drawn from
    /// transaction activity observed this round.
    pub trusted_candidates: Vec<PublicKey>,
    /// Signature over the domain-separated stage payload.
    pub signature: Signature,
}

/// A confidant's echo of every StageOne signature it observed.
///
/// `signatures[i]` is node i's StageOne signature as seen by the sender, or
/// the zero signature if none arrived. A sender whose vector disagrees with
/// a receiver's own StageOne record is vouching for votes that were never
/// cast and forfeits its seat for the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTwo {
    /// Confidant index of the sender within the current round table.
    pub sender: SenderIndex,
    /// Observed StageOne signatures indexed by confidant.
    pub signatures: Vec<Signature>,
    /// Signature over the domain-separated stage payload.
    pub signature: Signature,
}

/// A confidant's final verdict: elected writer, trust mask, and its
/// confirmation signature over the assembled block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageThree {
    /// Confidant index of the sender within the current round table.
    pub sender: SenderIndex,
    /// Confidant index the sender elected as writer.
    pub writer: SenderIndex,
    /// Assembly iteration the verdict refers to.
    pub iteration: u8,
    /// Writing-queue positions per confidant; INVALID marks excluded nodes.
    pub real_trusted: Vec<SenderIndex>,
    /// Hash of the block the sender assembled.
    pub block_hash: Hash,
    /// Sender's confirmation signature over the block hash.
    pub block_signature: Signature,
}
