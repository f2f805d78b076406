//! Canonical signing payloads for stage messages.
//!
//! Each stage signs a domain-separated byte string bound to the round number,
//! so a signature from one stage or round can never be replayed in another.

use crate::{RoundNumber, StageOne, StageThree, StageTwo};

/// Domain tag for StageOne signatures.
pub const DOMAIN_STAGE_ONE: &[u8] = b"troika/stage-1";
/// Domain tag for StageTwo signatures.
pub const DOMAIN_STAGE_TWO: &[u8] = b"troika/stage-2";
/// Domain tag for StageThree signatures.
pub const DOMAIN_STAGE_THREE: &[u8] = b"troika/stage-3";

/// Bytes covered by a StageOne signature.
pub fn stage_one_message(round: RoundNumber, stage: &StageOne) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(DOMAIN_STAGE_ONE);
    bytes.extend_from_slice(&round.0.to_le_bytes());
    bytes.push(stage.sender.0);
    bytes.extend_from_slice(stage.hash.as_bytes());
    for candidate in &stage.trusted_candidates {
        bytes.extend_from_slice(candidate.as_bytes());
    }
    bytes
}

/// Bytes covered by a StageTwo signature.
pub fn stage_two_message(round: RoundNumber, stage: &StageTwo) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(DOMAIN_STAGE_TWO);
    bytes.extend_from_slice(&round.0.to_le_bytes());
    bytes.push(stage.sender.0);
    for signature in &stage.signatures {
        bytes.extend_from_slice(&signature.to_bytes());
    }
    bytes
}

/// Bytes covered by a StageThree signature.
///
/// The block hash is part of the payload, so the single signature both
/// authenticates the verdict and confirms the assembled block.
pub fn stage_three_message(round: RoundNumber, stage: &StageThree) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(DOMAIN_STAGE_THREE);
    bytes.extend_from_slice(&round.0.to_le_bytes());
    bytes.push(stage.sender.0);
    bytes.push(stage.writer.0);
    bytes.push(stage.iteration);
    for index in &stage.real_trusted {
        bytes.push(index.0);
    }
    bytes.extend_from_slice(stage.block_hash.as_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_keypair;
    use crate::{Hash, SenderIndex, Signature};

    #[test]
    fn stage_one_signature_binds_round() {
        let keypair = test_keypair(0);
        let mut stage = StageOne {
            sender: SenderIndex(0),
            hash: Hash::digest(b"mask"),
            trusted_candidates: vec![test_keypair(1).public_key()],
            signature: Signature::zero(),
        };
        stage.signature = keypair.sign(&stage_one_message(RoundNumber(5), &stage));

        let key = keypair.public_key();
        assert!(key.verify(&stage_one_message(RoundNumber(5), &stage), &stage.signature));
        assert!(!key.verify(&stage_one_message(RoundNumber(6), &stage), &stage.signature));
    }

    #[test]
    fn stage_domains_are_distinct() {
        assert_ne!(DOMAIN_STAGE_ONE, DOMAIN_STAGE_TWO);
        assert_ne!(DOMAIN_STAGE_TWO, DOMAIN_STAGE_THREE);
    }
}
