//! Per-round stage vote storage.

use troika_types::{SenderIndex, StageKind, StageOne, StageThree, StageTwo};

/// Result of feeding one stage message into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The message was stored; keep collecting.
    Continue,
    /// The message was stored and the stage is now complete.
    Finish,
    /// Duplicate or irrelevant message; nothing changed.
    Ignore,
    /// The message was malformed; nothing changed.
    Failure,
}

/// Stage votes of the current round, indexed by confidant.
///
/// Sized once from the round table; duplicate votes are dropped (first copy
/// wins) and out-of-range senders are rejected without mutation. A stage is
/// "enough" when every confidant has either delivered its vote or been marked
/// untrusted.
#[derive(Debug, Clone)]
pub struct StageStore {
    stage_one: Vec<Option<StageOne>>,
    stage_two: Vec<Option<StageTwo>>,
    stage_three: Vec<Option<StageThree>>,
    untrusted: Vec<bool>,
}

impl StageStore {
    /// Create storage for a round with `n` confidants.
    pub fn new(n: usize) -> Self {
        Self {
            stage_one: vec![None; n],
            stage_two: vec![None; n],
            stage_three: vec![None; n],
            untrusted: vec![false; n],
        }
    }

    /// Trusted-set size the store was built for.
    pub fn len(&self) -> usize {
        self.untrusted.len()
    }

    /// Whether the store covers no confidants.
    pub fn is_empty(&self) -> bool {
        self.untrusted.is_empty()
    }

    /// Store a StageOne vote.
    pub fn add_stage_one(&mut self, stage: StageOne) -> StageOutcome {
        let index = stage.sender.as_usize();
        if index >= self.stage_one.len() {
            return StageOutcome::Failure;
        }
        if self.stage_one[index].is_some() {
            return StageOutcome::Ignore;
        }
        self.stage_one[index] = Some(stage);
        if self.enough(StageKind::One) {
            StageOutcome::Finish
        } else {
            StageOutcome::Continue
        }
    }

    /// Store a StageTwo vote.
    pub fn add_stage_two(&mut self, stage: StageTwo) -> StageOutcome {
        let index = stage.sender.as_usize();
        if index >= self.stage_two.len() {
            return StageOutcome::Failure;
        }
        if self.stage_two[index].is_some() {
            return StageOutcome::Ignore;
        }
        self.stage_two[index] = Some(stage);
        if self.enough(StageKind::Two) {
            StageOutcome::Finish
        } else {
            StageOutcome::Continue
        }
    }

    /// Store a StageThree verdict.
    pub fn add_stage_three(&mut self, stage: StageThree) -> StageOutcome {
        let index = stage.sender.as_usize();
        if index >= self.stage_three.len() {
            return StageOutcome::Failure;
        }
        if self.stage_three[index].is_some() {
            return StageOutcome::Ignore;
        }
        self.stage_three[index] = Some(stage);
        if self.enough(StageKind::Three) {
            StageOutcome::Finish
        } else {
            StageOutcome::Continue
        }
    }

    /// The stored StageOne vote of a confidant, if any.
    pub fn stage_one(&self, index: SenderIndex) -> Option<&StageOne> {
        self.stage_one.get(index.as_usize())?.as_ref()
    }

    /// The stored StageTwo vote of a confidant, if any.
    pub fn stage_two(&self, index: SenderIndex) -> Option<&StageTwo> {
        self.stage_two.get(index.as_usize())?.as_ref()
    }

    /// The stored StageThree verdict of a confidant, if any.
    pub fn stage_three(&self, index: SenderIndex) -> Option<&StageThree> {
        self.stage_three.get(index.as_usize())?.as_ref()
    }

    /// Iterate all stored StageOne votes with their indices.
    pub fn stage_ones(&self) -> impl Iterator<Item = (SenderIndex, &StageOne)> {
        self.stage_one
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SenderIndex(i as u8), s)))
    }

    /// Iterate all stored StageTwo votes with their indices.
    pub fn stage_twos(&self) -> impl Iterator<Item = (SenderIndex, &StageTwo)> {
        self.stage_two
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SenderIndex(i as u8), s)))
    }

    /// Iterate all stored StageThree verdicts with their indices.
    pub fn stage_threes(&self) -> impl Iterator<Item = (SenderIndex, &StageThree)> {
        self.stage_three
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SenderIndex(i as u8), s)))
    }

    /// Exclude a confidant from completion requirements.
    pub fn mark_untrusted(&mut self, index: SenderIndex) {
        if let Some(slot) = self.untrusted.get_mut(index.as_usize()) {
            *slot = true;
        }
    }

    /// Whether a confidant has been marked untrusted.
    pub fn is_untrusted(&self, index: SenderIndex) -> bool {
        self.untrusted
            .get(index.as_usize())
            .copied()
            .unwrap_or(true)
    }

    /// Confidant indices not marked untrusted.
    pub fn trusted_indices(&self) -> Vec<SenderIndex> {
        (0..self.untrusted.len())
            .map(|i| SenderIndex(i as u8))
            .filter(|i| !self.is_untrusted(*i))
            .collect()
    }

    /// Whether every confidant has delivered the stage or been excluded.
    pub fn enough(&self, kind: StageKind) -> bool {
        (0..self.untrusted.len()).all(|i| {
            self.untrusted[i]
                || match kind {
                    StageKind::One => self.stage_one[i].is_some(),
                    StageKind::Two => self.stage_two[i].is_some(),
                    StageKind::Three => self.stage_three[i].is_some(),
                }
        })
    }

    /// Confidants that still owe their vote for a stage.
    pub fn missing(&self, kind: StageKind) -> Vec<SenderIndex> {
        (0..self.untrusted.len())
            .filter(|&i| {
                !self.untrusted[i]
                    && match kind {
                        StageKind::One => self.stage_one[i].is_none(),
                        StageKind::Two => self.stage_two[i].is_none(),
                        StageKind::Three => self.stage_three[i].is_none(),
                    }
            })
            .map(|i| SenderIndex(i as u8))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::{Hash, Signature};

    fn stage_one(sender: u8) -> StageOne {
        StageOne {
            sender: SenderIndex(sender),
            hash: Hash::digest(&[sender]),
            trusted_candidates: vec![],
            signature: Signature::zero(),
        }
    }

    #[test]
    fn duplicate_votes_keep_the_first_copy() {
        let mut store = StageStore::new(3);
        assert_eq!(store.add_stage_one(stage_one(0)), StageOutcome::Continue);
        let mut replay = stage_one(0);
        replay.hash = Hash::digest(b"other");
        assert_eq!(store.add_stage_one(replay), StageOutcome::Ignore);
        assert_eq!(
            store.stage_one(SenderIndex(0)).unwrap().hash,
            Hash::digest(&[0])
        );
    }

    #[test]
    fn out_of_range_sender_is_rejected_without_mutation() {
        let mut store = StageStore::new(3);
        assert_eq!(store.add_stage_one(stage_one(7)), StageOutcome::Failure);
        assert_eq!(store.stage_ones().count(), 0);
    }

    #[test]
    fn untrusted_confidants_do_not_block_completion() {
        let mut store = StageStore::new(3);
        store.add_stage_one(stage_one(0));
        store.add_stage_one(stage_one(1));
        assert!(!store.enough(StageKind::One));
        store.mark_untrusted(SenderIndex(2));
        assert!(store.enough(StageKind::One));
        assert!(store.missing(StageKind::One).is_empty());
    }

    #[test]
    fn last_vote_reports_finish() {
        let mut store = StageStore::new(2);
        assert_eq!(store.add_stage_one(stage_one(0)), StageOutcome::Continue);
        assert_eq!(store.add_stage_one(stage_one(1)), StageOutcome::Finish);
    }
}
