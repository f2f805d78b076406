//! Liar detection, trusted-set election, and writer election.

use crate::StageStore;
use std::collections::BTreeMap;
use thiserror::Error;
use troika_types::{Hash, PublicKey, RoundNumber, SenderIndex};

/// Errors from characteristic analysis.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// More than half of the trusted set disagrees with the majority digest.
    #[error("{liars} liars out of {total} confidants, round is unrecoverable")]
    TooManyLiars { liars: usize, total: usize },

    /// No StageOne votes at all; nothing to analyze.
    #[error("no solutions to analyze")]
    NoSolutions,
}

/// Outcome of characteristic analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionAnalysis {
    /// The majority characteristic digest.
    pub canonical: Hash,
    /// Confidants whose digest diverges from the majority.
    pub liars: Vec<SenderIndex>,
}

/// Find the majority characteristic digest and the confidants lying about it.
///
/// Counts digests over present, not-yet-untrusted StageOne votes. Ties are
/// broken by digest bytes so every node settles on the same winner. Fails
/// when liars outnumber half of the trusted set; exactly half still succeeds.
pub fn analyze_solutions(stages: &StageStore) -> Result<SolutionAnalysis, AnalysisError> {
    let mut frequency: BTreeMap<Hash, usize> = BTreeMap::new();
    for (index, stage) in stages.stage_ones() {
        if !stages.is_untrusted(index) {
            *frequency.entry(stage.hash).or_insert(0) += 1;
        }
    }

    let canonical = frequency
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(hash, _)| *hash)
        .ok_or(AnalysisError::NoSolutions)?;

    let liars: Vec<SenderIndex> = stages
        .stage_ones()
        .filter(|(index, stage)| !stages.is_untrusted(*index) && stage.hash != canonical)
        .map(|(index, _)| index)
        .collect();

    let total = stages.len();
    if liars.len() * 2 > total {
        return Err(AnalysisError::TooManyLiars {
            liars: liars.len(),
            total,
        });
    }

    if !liars.is_empty() {
        tracing::warn!(liars = ?liars, %canonical, "divergent characteristic digests");
    }

    Ok(SolutionAnalysis { canonical, liars })
}

/// How many trusted nodes the next round should have, given the candidate
/// pool size.
///
/// Grows logarithmically with the pool; small pools are taken whole.
pub fn optimal_trusted_count(candidates: usize) -> usize {
    if candidates < 4 {
        tracing::warn!(candidates, "candidate pool below optimum, taking all");
        return candidates;
    }
    let optimum = (4.0 + 1.85 * ((candidates as f64) / 4.0).ln()).round() as usize;
    optimum.min(candidates)
}

/// Elect the next round's trusted set from StageOne candidate ballots.
///
/// Only ballots from non-liar, non-untrusted confidants count; a key listed
/// twice on one ballot counts once. Candidates backed by more than half of
/// the voters are taken first (most votes first), then the rest by vote count
/// until the optimum is reached.
pub fn elect_trusted(stages: &StageStore, liars: &[SenderIndex]) -> Vec<PublicKey> {
    let mut votes: BTreeMap<PublicKey, usize> = BTreeMap::new();
    let mut voters = 0usize;
    for (index, stage) in stages.stage_ones() {
        if stages.is_untrusted(index) || liars.contains(&index) {
            continue;
        }
        voters += 1;
        let mut ballot: Vec<&PublicKey> = stage.trusted_candidates.iter().collect();
        ballot.sort_unstable();
        ballot.dedup();
        for key in ballot {
            *votes.entry(*key).or_insert(0) += 1;
        }
    }

    let mut tallies: Vec<(PublicKey, usize)> = votes.into_iter().collect();
    // Most votes first; key order breaks ties deterministically.
    tallies.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let target = optimal_trusted_count(tallies.len());
    let mut elected: Vec<PublicKey> = tallies
        .iter()
        .filter(|(_, v)| v * 2 > voters)
        .map(|(k, _)| *k)
        .take(target)
        .collect();
    for (key, votes) in &tallies {
        if elected.len() >= target {
            break;
        }
        if votes * 2 <= voters {
            elected.push(*key);
        }
    }

    if elected.len() < target {
        tracing::warn!(
            elected = elected.len(),
            target,
            "trusted election fell short of optimum"
        );
    }
    elected
}

/// Deterministically elect the writer from the active trusted set.
///
/// Seeded by the previous block hash and the round number, so every honest
/// node picks the same confidant without further communication.
pub fn elect_writer(
    round: RoundNumber,
    active: &[SenderIndex],
    previous_hash: Hash,
) -> Option<SenderIndex> {
    if active.is_empty() {
        return None;
    }
    let mut seed = Vec::with_capacity(40);
    seed.extend_from_slice(previous_hash.as_bytes());
    seed.extend_from_slice(&round.0.to_le_bytes());
    let digest = Hash::digest(&seed);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest.as_bytes()[..8]);
    let pick = (u64::from_le_bytes(raw) as usize) % active.len();
    Some(active[pick])
}

/// Build the writing-queue mask for a round.
///
/// Entry `i` is confidant i's position in the takeover queue: the writer gets
/// 0, the next active confidant 1, and so on, wrapping around the active set.
/// Confidants outside the active set get [`SenderIndex::INVALID`].
pub fn writing_queue(n: usize, active: &[SenderIndex], writer: SenderIndex) -> Vec<SenderIndex> {
    let mut mask = vec![SenderIndex::INVALID; n];
    let Some(writer_pos) = active.iter().position(|i| *i == writer) else {
        return mask;
    };
    for (pos, index) in active.iter().enumerate() {
        let slot = (pos + active.len() - writer_pos) % active.len();
        if let Some(entry) = mask.get_mut(index.as_usize()) {
            *entry = SenderIndex(slot as u8);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::test_utils::test_keypair;
    use troika_types::{Signature, StageOne};

    fn stage_one(sender: u8, digest: &[u8], candidates: Vec<PublicKey>) -> StageOne {
        StageOne {
            sender: SenderIndex(sender),
            hash: Hash::digest(digest),
            trusted_candidates: candidates,
            signature: Signature::zero(),
        }
    }

    fn store_with_digests(digests: &[&[u8]]) -> StageStore {
        let mut store = StageStore::new(digests.len());
        for (i, digest) in digests.iter().enumerate() {
            store.add_stage_one(stage_one(i as u8, digest, vec![]));
        }
        store
    }

    #[test]
    fn majority_digest_wins_and_minority_becomes_liars() {
        let store = store_with_digests(&[b"a", b"a", b"a", b"b"]);
        let analysis = analyze_solutions(&store).unwrap();
        assert_eq!(analysis.canonical, Hash::digest(b"a"));
        assert_eq!(analysis.liars, vec![SenderIndex(3)]);
    }

    #[test]
    fn exactly_half_liars_still_succeeds() {
        let store = store_with_digests(&[b"a", b"a", b"b", b"c"]);
        let analysis = analyze_solutions(&store).unwrap();
        assert_eq!(analysis.canonical, Hash::digest(b"a"));
        assert_eq!(analysis.liars.len(), 2);
    }

    #[test]
    fn more_than_half_liars_fails() {
        let store = store_with_digests(&[b"a", b"b", b"c", b"d"]);
        match analyze_solutions(&store) {
            Err(AnalysisError::TooManyLiars { liars, total }) => {
                assert_eq!(liars, 3);
                assert_eq!(total, 4);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn writer_election_is_deterministic_and_in_range() {
        let active = vec![SenderIndex(0), SenderIndex(2), SenderIndex(3)];
        let prev = Hash::digest(b"prev");
        let a = elect_writer(RoundNumber(7), &active, prev).unwrap();
        let b = elect_writer(RoundNumber(7), &active, prev).unwrap();
        assert_eq!(a, b);
        assert!(active.contains(&a));
        assert!(elect_writer(RoundNumber(7), &[], prev).is_none());
    }

    #[test]
    fn writing_queue_wraps_around_active_set() {
        let active = vec![SenderIndex(0), SenderIndex(2), SenderIndex(3)];
        let mask = writing_queue(4, &active, SenderIndex(2));
        assert_eq!(mask[2], SenderIndex(0));
        assert_eq!(mask[3], SenderIndex(1));
        assert_eq!(mask[0], SenderIndex(2));
        assert_eq!(mask[1], SenderIndex::INVALID);
    }

    #[test]
    fn trusted_election_prefers_majority_backed_candidates() {
        let keys: Vec<PublicKey> = (0..5).map(|i| test_keypair(i).public_key()).collect();
        let mut store = StageStore::new(3);
        // keys[0] backed by all three voters, keys[1] by one.
        store.add_stage_one(stage_one(0, b"a", vec![keys[0], keys[1]]));
        store.add_stage_one(stage_one(1, b"a", vec![keys[0]]));
        store.add_stage_one(stage_one(2, b"a", vec![keys[0]]));
        let elected = elect_trusted(&store, &[]);
        assert_eq!(elected[0], keys[0]);
        assert!(elected.contains(&keys[1]));
    }

    #[test]
    fn liar_ballots_are_discarded() {
        let keys: Vec<PublicKey> = (0..2).map(|i| test_keypair(i).public_key()).collect();
        let mut store = StageStore::new(3);
        store.add_stage_one(stage_one(0, b"a", vec![keys[0]]));
        store.add_stage_one(stage_one(1, b"a", vec![keys[0]]));
        store.add_stage_one(stage_one(2, b"b", vec![keys[1]]));
        let elected = elect_trusted(&store, &[SenderIndex(2)]);
        assert!(!elected.contains(&keys[1]));
    }

    #[test]
    fn optimum_grows_logarithmically() {
        assert_eq!(optimal_trusted_count(3), 3);
        assert_eq!(optimal_trusted_count(4), 4);
        assert!(optimal_trusted_count(100) < 12);
        assert!(optimal_trusted_count(100) >= 9);
    }
}
