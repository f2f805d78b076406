//! Consensus driver state machine.
//!
//! This module implements the per-round consensus driver as a synchronous,
//! event-driven model. One state is active at a time; transitions are raised
//! by stage completion, timer expiry, or round-table arrival, and looked up
//! in a fixed transition table.

use crate::{
    analyze_solutions, elect_trusted, elect_writer, writing_queue, BlockAssembler, SolverConfig,
    StageOutcome, StageStore,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use troika_conveyer::Conveyer;
use troika_core::{Action, Event, SubStateMachine, TimerId};
use troika_messages::{
    ProtocolMessage, RoundTableGossip, StageOneGossip, StageRequest, StageThreeGossip,
    StageTwoGossip, WriterNotification,
};
use troika_types::{
    stage_one_message, stage_three_message, stage_two_message, Characteristic, DeferredBlock,
    Hash, KeyPair, PoolMetaInfo, PublicKey, RoundNumber, RoundTable, SenderIndex, Signature,
    StageKind, StageOne, StageThree, StageTwo, MIN_CONFIDANTS,
};

/// The driver's states, one active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Not started, or between abandonment and the next round table.
    NoState,
    /// Observing the round without a seat in the trusted set.
    Normal,
    /// Collecting characteristic proposals.
    TrustedStage1,
    /// Collecting signature echoes.
    TrustedStage2,
    /// Electing the writer and assembling the block.
    TrustedStage3,
    /// Waiting for block confirmation and our writing-queue slot.
    Waiting,
    /// Elected writer: finalizing the block and opening the next round.
    Writer,
}

impl StateKind {
    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            StateKind::NoState => "NoState",
            StateKind::Normal => "Normal",
            StateKind::TrustedStage1 => "TrustedStage1",
            StateKind::TrustedStage2 => "TrustedStage2",
            StateKind::TrustedStage3 => "TrustedStage3",
            StateKind::Waiting => "Waiting",
            StateKind::Writer => "Writer",
        }
    }

    /// Which stage this state is collecting, if any.
    fn stage_kind(self) -> Option<StageKind> {
        match self {
            StateKind::TrustedStage1 => Some(StageKind::One),
            StateKind::TrustedStage2 => Some(StageKind::Two),
            StateKind::TrustedStage3 => Some(StageKind::Three),
            _ => None,
        }
    }

    /// Whether this state arms the expiry timer.
    fn is_timed(self) -> bool {
        !matches!(self, StateKind::NoState | StateKind::Normal)
    }
}

/// Internal transition triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SolverEvent {
    SetNormal,
    SetTrusted,
    SetWriter,
    StageOneEnough,
    StageTwoEnough,
    StageThreeEnough,
    BigBang,
    Expired,
}

/// Everything the driver tracks for the round in progress.
struct RoundContext {
    table: RoundTable,
    /// Our seat in the trusted set; `None` when observing.
    own_index: Option<SenderIndex>,
    stages: StageStore,
    packets_ready: bool,
    characteristic: Option<Characteristic>,
    writer: Option<SenderIndex>,
    real_trusted: Vec<SenderIndex>,
    deferred: Option<DeferredBlock>,
    next_round_trusted: Vec<PublicKey>,
    /// Whether the confirmed block has already been handed to storage.
    persisted: bool,
    /// Whether the missing-vote escalation already reached its last tier.
    request_escalated: bool,
}

impl RoundContext {
    fn new(table: RoundTable, own_key: &PublicKey) -> Self {
        let n = table.confidant_count();
        let own_index = table.confidant_index(own_key);
        Self {
            table,
            own_index,
            stages: StageStore::new(n),
            packets_ready: false,
            characteristic: None,
            writer: None,
            real_trusted: Vec::new(),
            deferred: None,
            next_round_trusted: Vec::new(),
            persisted: false,
            request_escalated: false,
        }
    }

    fn round(&self) -> RoundNumber {
        self.table.round
    }
}

/// Consensus driver.
///
/// Handles round entry, the three voting stages, writer election, block
/// confirmation, and opening of the next round. This is a synchronous
/// implementation; all I/O happens through returned `Action`s.
///
/// # State Machine Flow
///
/// 1. **Round Table Received** → enter `TrustedStage1` (or `Normal`)
/// 2. **Packets Ready** → build characteristic, broadcast StageOne
/// 3. **StageOne complete** → broadcast signature echoes (StageTwo)
/// 4. **StageTwo complete** → detect liars, elect writer, assemble block,
///    broadcast verdict (StageThree)
/// 5. **StageThree complete** → `Waiting`; confirm block, take writing-queue
///    slot 0 as `Writer` or arm the takeover delay
pub struct SolverState {
    /// Signing key for stage votes.
    keypair: KeyPair,

    /// Cached public key of `keypair`.
    own_key: PublicKey,

    /// Tuning knobs.
    config: SolverConfig,

    /// Shared packet store.
    conveyer: Arc<Conveyer>,

    /// Deterministic block builder over the same store.
    assembler: BlockAssembler,

    /// (state, event) → next state.
    transitions: HashMap<(StateKind, SolverEvent), StateKind>,

    /// Currently active state.
    state: StateKind,

    /// The round in progress, if any.
    round: Option<RoundContext>,

    /// Sequence of the last persisted block.
    last_sequence: RoundNumber,

    /// Hash of the last persisted block (ZERO before the first).
    last_hash: Hash,

    /// Whether `start` has been called.
    started: bool,

    /// Current time.
    now: Duration,
}

impl SolverState {
    /// Create a driver over a shared packet store.
    pub fn new(keypair: KeyPair, config: SolverConfig, conveyer: Arc<Conveyer>) -> Self {
        let own_key = keypair.public_key();
        let assembler = BlockAssembler::new(conveyer.clone());
        Self {
            keypair,
            own_key,
            config,
            conveyer,
            assembler,
            transitions: Self::default_transitions(),
            state: StateKind::NoState,
            round: None,
            last_sequence: RoundNumber(0),
            last_hash: Hash::ZERO,
            started: false,
            now: Duration::ZERO,
        }
    }

    fn default_transitions() -> HashMap<(StateKind, SolverEvent), StateKind> {
        use SolverEvent::*;
        use StateKind::*;
        let all = [
            NoState,
            Normal,
            TrustedStage1,
            TrustedStage2,
            TrustedStage3,
            Waiting,
            Writer,
        ];
        let mut table = HashMap::new();
        for state in all {
            table.insert((state, SetNormal), Normal);
            table.insert((state, SetTrusted), TrustedStage1);
            table.insert((state, BigBang), Normal);
            if state.is_timed() {
                table.insert((state, Expired), Normal);
            }
        }
        table.insert((TrustedStage1, StageOneEnough), TrustedStage2);
        table.insert((TrustedStage2, StageTwoEnough), TrustedStage3);
        table.insert((TrustedStage3, StageThreeEnough), Waiting);
        table.insert((Waiting, SetWriter), Writer);
        table
    }

    /// Begin operating. Idempotent; a second call is a logged no-op.
    pub fn start(&mut self) -> Vec<Action> {
        if self.started {
            warn!("solver already started");
            return Vec::new();
        }
        if self.transitions.is_empty() {
            error!("transition table is empty, solver cannot run");
            return Vec::new();
        }
        self.started = true;
        info!("solver started");
        Vec::new()
    }

    /// Open round 1 from local state, bootstrapping a fresh network.
    ///
    /// Builds a table over the given trusted set and the packets currently in
    /// the store, announces it, and feeds it back to ourselves.
    pub fn open_first_round(&mut self, confidants: Vec<PublicKey>) -> Vec<Action> {
        let table = RoundTable {
            round: self.last_sequence.next(),
            timestamp: self.now.as_millis() as u64,
            confidants,
            hashes: self.conveyer.live_hashes(),
        };
        info!(round = %table.round, confidants = table.confidant_count(), "opening first round");
        vec![
            Action::Broadcast {
                message: ProtocolMessage::RoundTable(RoundTableGossip {
                    table: table.clone(),
                }),
            },
            Action::EnqueueInternal {
                event: Event::RoundTableReceived { table },
            },
        ]
    }

    /// Currently active state.
    pub fn state_kind(&self) -> StateKind {
        self.state
    }

    /// Sequence of the last persisted block.
    pub fn last_sequence(&self) -> RoundNumber {
        self.last_sequence
    }

    /// Hash of the last persisted block.
    pub fn last_hash(&self) -> Hash {
        self.last_hash
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State machine mechanics
    // ═══════════════════════════════════════════════════════════════════════

    fn raise(&mut self, event: SolverEvent, actions: &mut Vec<Action>) {
        let mut queue = VecDeque::new();
        queue.push_back(event);
        while let Some(event) = queue.pop_front() {
            let Some(&next) = self.transitions.get(&(self.state, event)) else {
                debug!(state = self.state.name(), ?event, "no transition, ignoring");
                continue;
            };
            self.switch_state(next, actions, &mut queue);
        }
    }

    fn switch_state(
        &mut self,
        next: StateKind,
        actions: &mut Vec<Action>,
        queue: &mut VecDeque<SolverEvent>,
    ) {
        if next == self.state && !self.config.repeat_state_enabled {
            debug!(state = next.name(), "repeat state suppressed");
            return;
        }
        self.on_exit(actions);
        actions.push(Action::CancelTimer {
            id: TimerId::StateExpiry,
        });
        info!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
        self.on_enter(actions, queue);
        if self.config.timeouts_enabled && next.is_timed() {
            actions.push(Action::SetTimer {
                id: TimerId::StateExpiry,
                duration: self.config.state_timeout,
            });
        }
    }

    fn on_exit(&mut self, actions: &mut Vec<Action>) {
        if self.state.stage_kind().is_some() {
            actions.push(Action::CancelTimer {
                id: TimerId::StageRequest,
            });
            actions.push(Action::CancelTimer {
                id: TimerId::NeighborsRequest,
            });
            if let Some(ctx) = self.round.as_mut() {
                ctx.request_escalated = false;
            }
        }
        if self.state == StateKind::Waiting {
            actions.push(Action::CancelTimer {
                id: TimerId::RoundDelay,
            });
        }
    }

    fn on_enter(&mut self, actions: &mut Vec<Action>, queue: &mut VecDeque<SolverEvent>) {
        match self.state {
            StateKind::NoState | StateKind::Normal => {}
            StateKind::TrustedStage1 => {
                let ready = self.round.as_ref().is_some_and(|c| c.packets_ready);
                if ready {
                    self.build_stage_one(actions, queue);
                }
            }
            StateKind::TrustedStage2 => self.build_stage_two(actions, queue),
            StateKind::TrustedStage3 => self.enter_stage_three(actions, queue),
            StateKind::Waiting => self.enter_waiting(actions, queue),
            StateKind::Writer => self.enter_writer(actions),
        }
    }

    fn arm_stage_request_timer(&self, actions: &mut Vec<Action>) {
        if self.config.timeouts_enabled {
            actions.push(Action::SetTimer {
                id: TimerId::StageRequest,
                duration: self.config.stage_request_timeout,
            });
        }
    }

    fn abandon(&mut self, actions: &mut Vec<Action>) {
        if let Some(ctx) = &self.round {
            actions.push(Action::EnqueueInternal {
                event: Event::ConsensusAbandoned {
                    round: ctx.round(),
                },
            });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round entry
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self, table), fields(round = %table.round))]
    fn on_round_table(&mut self, table: &RoundTable) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.started {
            debug!("round table before start, ignoring");
            return actions;
        }
        if !table.is_valid() {
            warn!(confidants = table.confidant_count(), "invalid round table");
            return actions;
        }
        if table.round <= self.last_sequence {
            debug!(%self.last_sequence, "stale round table");
            return actions;
        }
        if let Some(ctx) = &self.round {
            if table.round <= ctx.round() {
                debug!(current = %ctx.round(), "round table does not advance the round");
                return actions;
            }
            if ctx.deferred.as_ref().is_some_and(|d| !d.is_confirmed()) {
                // A block may only be confirmed by the round that built it.
                warn!(
                    abandoned = %ctx.round(),
                    "discarding unconfirmed deferred block"
                );
            }
        }

        let ctx = RoundContext::new(table.clone(), &self.own_key);
        let trusted = ctx.own_index.is_some();
        self.round = Some(ctx);
        if trusted {
            info!("entering round as trusted");
            self.raise(SolverEvent::SetTrusted, &mut actions);
        } else {
            info!("entering round as normal");
            self.raise(SolverEvent::SetNormal, &mut actions);
        }
        actions
    }

    fn on_packets_ready(&mut self, round: RoundNumber) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(ctx) = self.round.as_mut() else {
            return actions;
        };
        if ctx.round() != round {
            return actions;
        }
        ctx.packets_ready = true;
        if self.state == StateKind::TrustedStage1 {
            let mut queue = VecDeque::new();
            self.build_stage_one(&mut actions, &mut queue);
            while let Some(event) = queue.pop_front() {
                self.raise(event, &mut actions);
            }
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage one
    // ═══════════════════════════════════════════════════════════════════════

    fn build_stage_one(&mut self, actions: &mut Vec<Action>, queue: &mut VecDeque<SolverEvent>) {
        let (round, own, hashes, mut candidates) = {
            let Some(ctx) = self.round.as_ref() else {
                return;
            };
            let Some(own) = ctx.own_index else {
                return;
            };
            if ctx.stages.stage_one(own).is_some() {
                return;
            }
            (
                ctx.round(),
                own,
                ctx.table.hashes.clone(),
                ctx.table.confidants.clone(),
            )
        };

        let mut mask = Vec::new();
        for hash in &hashes {
            let Some(packet) = self.conveyer.lookup(hash) else {
                error!(%hash, "packet vanished between readiness and stage one");
                self.abandon(actions);
                queue.push_back(SolverEvent::BigBang);
                return;
            };
            for tx in packet.transactions() {
                let valid = tx.verify_signature();
                mask.push(valid as u8);
                if valid {
                    candidates.push(tx.source);
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        let characteristic = Characteristic::new(mask);
        let digest = characteristic.digest(round);

        let mut stage = StageOne {
            sender: own,
            hash: digest,
            trusted_candidates: candidates,
            signature: Signature::zero(),
        };
        stage.signature = self.keypair.sign(&stage_one_message(round, &stage));

        info!(%round, %digest, "broadcasting stage one");
        actions.push(Action::Broadcast {
            message: ProtocolMessage::StageOne(StageOneGossip {
                round,
                stage: stage.clone(),
            }),
        });
        let outcome = {
            let Some(ctx) = self.round.as_mut() else {
                return;
            };
            ctx.characteristic = Some(characteristic);
            ctx.stages.add_stage_one(stage)
        };
        self.arm_stage_request_timer(actions);
        if outcome == StageOutcome::Finish {
            queue.push_back(SolverEvent::StageOneEnough);
        }
    }

    fn on_stage_one(&mut self, round: RoundNumber, stage: &StageOne) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(ctx) = self.round.as_mut() else {
            return actions;
        };
        if ctx.round() != round {
            debug!(%round, current = %ctx.round(), "stage one for another round");
            return actions;
        }
        let Some(key) = ctx.table.confidant_key(stage.sender) else {
            warn!(sender = %stage.sender, "stage one from unknown sender");
            return actions;
        };
        if !key.verify(&stage_one_message(round, stage), &stage.signature) {
            warn!(sender = %stage.sender, "stage one signature invalid");
            return actions;
        }
        match ctx.stages.add_stage_one(stage.clone()) {
            StageOutcome::Finish if self.state == StateKind::TrustedStage1 => {
                self.raise(SolverEvent::StageOneEnough, &mut actions);
            }
            StageOutcome::Failure => warn!(sender = %stage.sender, "stage one rejected"),
            _ => {}
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage two
    // ═══════════════════════════════════════════════════════════════════════

    fn build_stage_two(&mut self, actions: &mut Vec<Action>, queue: &mut VecDeque<SolverEvent>) {
        let Some(ctx) = self.round.as_mut() else {
            return;
        };
        let Some(own) = ctx.own_index else {
            return;
        };
        if ctx.stages.stage_two(own).is_some() {
            return;
        }

        let n = ctx.stages.len();
        let signatures: Vec<Signature> = (0..n)
            .map(|i| {
                ctx.stages
                    .stage_one(SenderIndex(i as u8))
                    .map(|s| s.signature)
                    .unwrap_or_else(Signature::zero)
            })
            .collect();

        let mut stage = StageTwo {
            sender: own,
            signatures,
            signature: Signature::zero(),
        };
        stage.signature = self
            .keypair
            .sign(&stage_two_message(ctx.round(), &stage));

        info!(round = %ctx.round(), "broadcasting stage two");
        actions.push(Action::Broadcast {
            message: ProtocolMessage::StageTwo(StageTwoGossip {
                round: ctx.round(),
                stage: stage.clone(),
            }),
        });
        let outcome = ctx.stages.add_stage_two(stage);
        self.arm_stage_request_timer(actions);
        if outcome == StageOutcome::Finish {
            queue.push_back(SolverEvent::StageTwoEnough);
        }
    }

    fn on_stage_two(&mut self, round: RoundNumber, stage: &StageTwo) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(ctx) = self.round.as_mut() else {
            return actions;
        };
        if ctx.round() != round {
            return actions;
        }
        let Some(key) = ctx.table.confidant_key(stage.sender) else {
            warn!(sender = %stage.sender, "stage two from unknown sender");
            return actions;
        };
        if !key.verify(&stage_two_message(round, stage), &stage.signature) {
            warn!(sender = %stage.sender, "stage two signature invalid");
            return actions;
        }
        match ctx.stages.add_stage_two(stage.clone()) {
            StageOutcome::Finish if self.state == StateKind::TrustedStage2 => {
                self.raise(SolverEvent::StageTwoEnough, &mut actions);
            }
            StageOutcome::Failure => warn!(sender = %stage.sender, "stage two rejected"),
            _ => {}
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage three
    // ═══════════════════════════════════════════════════════════════════════

    fn enter_stage_three(&mut self, actions: &mut Vec<Action>, queue: &mut VecDeque<SolverEvent>) {
        let round = match &self.round {
            Some(ctx) => ctx.round(),
            None => return,
        };

        self.cross_check_stage_two();

        let analysis = {
            let ctx = self.round.as_ref().map(|c| &c.stages);
            match ctx.map(analyze_solutions) {
                Some(Ok(analysis)) => analysis,
                Some(Err(err)) => {
                    error!(%round, %err, "characteristic analysis failed");
                    self.abandon(actions);
                    queue.push_back(SolverEvent::BigBang);
                    return;
                }
                None => return,
            }
        };

        let Some(ctx) = self.round.as_mut() else {
            return;
        };
        for liar in &analysis.liars {
            ctx.stages.mark_untrusted(*liar);
        }
        ctx.next_round_trusted = elect_trusted(&ctx.stages, &analysis.liars);

        let active = ctx.stages.trusted_indices();
        let Some(writer) = elect_writer(round, &active, self.last_hash) else {
            error!(%round, "no active confidants left for writer election");
            self.abandon(actions);
            queue.push_back(SolverEvent::BigBang);
            return;
        };
        ctx.writer = Some(writer);
        ctx.real_trusted = writing_queue(ctx.stages.len(), &active, writer);
        info!(%round, %writer, active = active.len(), "writer elected");

        self.build_stage_three(analysis.canonical, actions, queue);
    }

    /// Compare each confidant's echoed StageOne signature vector against the
    /// locally stored StageOne votes. A sender whose claimed vector disagrees
    /// with the local record is vouching for votes that were never cast and is
    /// marked untrusted for the round.
    fn cross_check_stage_two(&mut self) {
        let Some(ctx) = self.round.as_mut() else {
            return;
        };
        let n = ctx.stages.len();
        let zero = Signature::zero();
        let mut equivocators = Vec::new();
        for (sender, echo) in ctx.stages.stage_twos() {
            for i in 0..n {
                let Some(ours) = ctx.stages.stage_one(SenderIndex(i as u8)).map(|s| s.signature)
                else {
                    continue;
                };
                match echo.signatures.get(i) {
                    Some(sig) if *sig != zero && *sig != ours => {
                        equivocators.push(sender);
                        break;
                    }
                    _ => {}
                }
            }
        }
        for index in equivocators {
            warn!(%index, "stage two signature claim mismatch");
            ctx.stages.mark_untrusted(index);
        }
    }

    fn build_stage_three(
        &mut self,
        canonical: Hash,
        actions: &mut Vec<Action>,
        queue: &mut VecDeque<SolverEvent>,
    ) {
        let (round, own, writer, table, real_trusted, own_characteristic, iteration) = {
            let Some(ctx) = self.round.as_mut() else {
                return;
            };
            let Some(own) = ctx.own_index else {
                return;
            };
            let Some(writer) = ctx.writer else {
                return;
            };
            let iteration = match ctx.deferred.take() {
                Some(previous) => previous.iteration.saturating_add(1),
                None => 0,
            };
            (
                ctx.round(),
                own,
                writer,
                ctx.table.clone(),
                ctx.real_trusted.clone(),
                ctx.characteristic.clone(),
                iteration,
            )
        };

        let own_digest = own_characteristic.as_ref().map(|c| c.digest(round));
        if own_digest != Some(canonical) {
            // We cannot reconstruct the majority mask from its digest, so we
            // sit this verdict out and let the others confirm the block.
            warn!(%round, "own characteristic diverges from majority, skipping verdict");
            let enough = {
                let Some(ctx) = self.round.as_mut() else {
                    return;
                };
                ctx.stages.mark_untrusted(own);
                ctx.stages.enough(StageKind::Three)
            };
            self.arm_stage_request_timer(actions);
            if enough {
                queue.push_back(SolverEvent::StageThreeEnough);
            }
            return;
        }
        let characteristic = own_characteristic.unwrap_or_default();

        let Some(writer_key) = table.confidant_key(writer).copied() else {
            return;
        };
        let meta = PoolMetaInfo {
            sequence: round,
            timestamp: table.timestamp,
            previous_hash: self.last_hash,
            writer: writer_key,
            real_trusted: real_trusted.clone(),
        };
        let block = match self.assembler.assemble(&meta, &table, &characteristic) {
            Ok(block) => block,
            Err(err) => {
                error!(%round, %err, "block assembly failed");
                self.abandon(actions);
                queue.push_back(SolverEvent::BigBang);
                return;
            }
        };
        if iteration == 0 {
            self.conveyer
                .archive_round(round, &table.hashes, Some(characteristic));
        }

        let block_hash = block.hash();
        let mut deferred = DeferredBlock::new(block);
        deferred.iteration = iteration;

        let mut stage = StageThree {
            sender: own,
            writer,
            iteration,
            real_trusted,
            block_hash,
            block_signature: Signature::zero(),
        };
        stage.block_signature = self.keypair.sign(&stage_three_message(round, &stage));
        deferred.add_signature(own, stage.block_signature);

        info!(%round, %block_hash, iteration, "broadcasting stage three");
        actions.push(Action::Broadcast {
            message: ProtocolMessage::StageThree(StageThreeGossip {
                round,
                stage: stage.clone(),
            }),
        });
        let outcome = {
            let Some(ctx) = self.round.as_mut() else {
                return;
            };
            ctx.deferred = Some(deferred);
            ctx.stages.add_stage_three(stage)
        };
        self.arm_stage_request_timer(actions);
        if outcome == StageOutcome::Finish {
            queue.push_back(SolverEvent::StageThreeEnough);
        }
    }

    fn on_stage_three(&mut self, round: RoundNumber, stage: &StageThree) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(ctx) = self.round.as_mut() else {
            return actions;
        };
        if ctx.round() != round {
            return actions;
        }
        let Some(key) = ctx.table.confidant_key(stage.sender) else {
            warn!(sender = %stage.sender, "stage three from unknown sender");
            return actions;
        };
        if !key.verify(&stage_three_message(round, stage), &stage.block_signature) {
            warn!(sender = %stage.sender, "stage three signature invalid");
            return actions;
        }
        if let Some(writer) = ctx.writer {
            if stage.writer != writer {
                warn!(
                    sender = %stage.sender,
                    theirs = %stage.writer,
                    ours = %writer,
                    "divergent writer verdict"
                );
            }
        }

        let outcome = ctx.stages.add_stage_three(stage.clone());
        if outcome == StageOutcome::Failure {
            warn!(sender = %stage.sender, "stage three rejected");
            return actions;
        }
        if outcome != StageOutcome::Ignore {
            self.apply_confirmation(stage, &mut actions);
        }
        if outcome == StageOutcome::Finish && self.state == StateKind::TrustedStage3 {
            self.raise(SolverEvent::StageThreeEnough, &mut actions);
        }
        actions
    }

    /// Count a matching verdict towards block confirmation, persisting and
    /// finalizing once the threshold is met.
    fn apply_confirmation(&mut self, stage: &StageThree, actions: &mut Vec<Action>) {
        let newly_confirmed = {
            let Some(ctx) = self.round.as_mut() else {
                return;
            };
            let Some(deferred) = ctx.deferred.as_mut() else {
                return;
            };
            if stage.block_hash != deferred.block.hash() || stage.iteration != deferred.iteration {
                return;
            }
            let before = deferred.is_confirmed();
            deferred.add_signature(stage.sender, stage.block_signature);
            !before && deferred.is_confirmed()
        };
        if newly_confirmed {
            match self.state {
                StateKind::Waiting => self.persist_confirmed(actions),
                StateKind::Writer => {
                    self.persist_confirmed(actions);
                    self.finalize_round(actions);
                }
                _ => {}
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Waiting and writing
    // ═══════════════════════════════════════════════════════════════════════

    fn enter_waiting(&mut self, actions: &mut Vec<Action>, queue: &mut VecDeque<SolverEvent>) {
        // Verdicts that arrived during stage three already carry their
        // confirmation signatures; re-check the threshold now.
        let confirmations: Vec<StageThree> = self
            .round
            .as_ref()
            .map(|ctx| ctx.stages.stage_threes().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default();
        for stage in &confirmations {
            self.apply_stored_confirmation(stage);
        }

        let Some(ctx) = self.round.as_ref() else {
            return;
        };
        let confirmed = ctx.deferred.as_ref().is_some_and(|d| d.is_confirmed());
        if confirmed {
            self.persist_confirmed(actions);
        }

        let Some(ctx) = self.round.as_ref() else {
            return;
        };
        let slot = ctx
            .own_index
            .and_then(|own| ctx.real_trusted.get(own.as_usize()))
            .copied()
            .unwrap_or(SenderIndex::INVALID);

        if slot == SenderIndex(0) {
            queue.push_back(SolverEvent::SetWriter);
        } else if !slot.is_invalid() && self.config.timeouts_enabled {
            let delay = self.config.round_delay * u32::from(slot.0);
            debug!(%slot, ?delay, "arming writing-queue takeover");
            actions.push(Action::SetTimer {
                id: TimerId::RoundDelay,
                duration: delay,
            });
        } else if slot.is_invalid() {
            debug!("excluded from the writing queue, waiting for the next round");
        }
    }

    fn apply_stored_confirmation(&mut self, stage: &StageThree) {
        let Some(ctx) = self.round.as_mut() else {
            return;
        };
        let Some(deferred) = ctx.deferred.as_mut() else {
            return;
        };
        if stage.block_hash == deferred.block.hash() && stage.iteration == deferred.iteration {
            deferred.add_signature(stage.sender, stage.block_signature);
        }
    }

    fn persist_confirmed(&mut self, actions: &mut Vec<Action>) {
        let Some(ctx) = self.round.as_mut() else {
            return;
        };
        if ctx.persisted {
            return;
        }
        let Some(deferred) = ctx.deferred.as_ref() else {
            return;
        };
        if !deferred.is_confirmed() {
            return;
        }
        let block = deferred.block.clone();
        ctx.persisted = true;
        self.last_sequence = block.sequence;
        self.last_hash = block.hash();
        info!(
            sequence = %block.sequence,
            hash = %self.last_hash,
            transactions = block.transactions.len(),
            "block confirmed"
        );
        actions.push(Action::PersistBlock { block });
    }

    fn enter_writer(&mut self, actions: &mut Vec<Action>) {
        let confirmed = self
            .round
            .as_ref()
            .and_then(|c| c.deferred.as_ref())
            .is_some_and(|d| d.is_confirmed());
        if confirmed {
            self.persist_confirmed(actions);
            self.finalize_round(actions);
        } else {
            debug!("writer waiting for confirmation threshold");
        }
    }

    /// Announce the confirmed block and open the next round.
    fn finalize_round(&mut self, actions: &mut Vec<Action>) {
        let Some(ctx) = self.round.as_ref() else {
            return;
        };
        if !ctx.persisted {
            return;
        }
        let round = ctx.round();
        let confidants = if ctx.next_round_trusted.len() >= MIN_CONFIDANTS {
            ctx.next_round_trusted.clone()
        } else {
            warn!(
                elected = ctx.next_round_trusted.len(),
                "elected trusted set too small, keeping the current one"
            );
            ctx.table.confidants.clone()
        };
        let table = RoundTable {
            round: round.next(),
            timestamp: self.now.as_millis() as u64,
            confidants,
            hashes: self.conveyer.live_hashes(),
        };
        info!(
            finished = %round,
            next = %table.round,
            packets = table.hashes.len(),
            "opening next round"
        );
        actions.push(Action::Broadcast {
            message: ProtocolMessage::WriterNotification(WriterNotification {
                round,
                writer: self.own_key,
            }),
        });
        actions.push(Action::Broadcast {
            message: ProtocolMessage::RoundTable(RoundTableGossip {
                table: table.clone(),
            }),
        });
        actions.push(Action::EnqueueInternal {
            event: Event::RoundTableReceived { table },
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Re-request escalation and timers
    // ═══════════════════════════════════════════════════════════════════════

    fn on_stage_request_timer(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(kind) = self.state.stage_kind() else {
            return actions;
        };
        let Some(ctx) = self.round.as_ref() else {
            return actions;
        };
        let Some(own) = ctx.own_index else {
            return actions;
        };
        let missing = ctx.stages.missing(kind);
        if missing.is_empty() {
            return actions;
        }
        info!(%kind, missing = missing.len(), "re-requesting missing votes point-to-point");
        for index in missing {
            if let Some(recipient) = ctx.table.confidant_key(index) {
                actions.push(Action::SendTo {
                    recipient: *recipient,
                    message: ProtocolMessage::StageRequest(StageRequest {
                        round: ctx.round(),
                        kind,
                        from: own,
                        required: index,
                    }),
                });
            }
        }
        actions.push(Action::SetTimer {
            id: TimerId::NeighborsRequest,
            duration: self.config.stage_request_timeout,
        });
        actions
    }

    fn on_neighbors_request_timer(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(kind) = self.state.stage_kind() else {
            return actions;
        };
        let (escalated, missing, round, own) = {
            let Some(ctx) = self.round.as_ref() else {
                return actions;
            };
            let Some(own) = ctx.own_index else {
                return actions;
            };
            (
                ctx.request_escalated,
                ctx.stages.missing(kind),
                ctx.round(),
                own,
            )
        };
        if missing.is_empty() {
            return actions;
        }

        if !escalated {
            // Second tier: any neighbor holding the vote may relay it.
            info!(%kind, missing = missing.len(), "asking neighbors for missing votes");
            for index in &missing {
                actions.push(Action::Broadcast {
                    message: ProtocolMessage::StageRequest(StageRequest {
                        round,
                        kind,
                        from: own,
                        required: *index,
                    }),
                });
            }
            if let Some(ctx) = self.round.as_mut() {
                ctx.request_escalated = true;
            }
            actions.push(Action::SetTimer {
                id: TimerId::NeighborsRequest,
                duration: self.config.stage_request_timeout,
            });
            return actions;
        }

        // Last tier: proceed with partial data, excluding the silent nodes.
        warn!(%kind, silent = ?missing, "proceeding without silent confidants");
        if let Some(ctx) = self.round.as_mut() {
            for index in missing {
                ctx.stages.mark_untrusted(index);
            }
        }
        let enough = self
            .round
            .as_ref()
            .is_some_and(|c| c.stages.enough(kind));
        if enough {
            let event = match kind {
                StageKind::One => SolverEvent::StageOneEnough,
                StageKind::Two => SolverEvent::StageTwoEnough,
                StageKind::Three => SolverEvent::StageThreeEnough,
            };
            self.raise(event, &mut actions);
        }
        actions
    }

    fn on_stage_request(
        &mut self,
        round: RoundNumber,
        kind: StageKind,
        from: SenderIndex,
        required: SenderIndex,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(ctx) = self.round.as_ref() else {
            return actions;
        };
        if ctx.round() != round {
            return actions;
        }
        let Some(recipient) = ctx.table.confidant_key(from).copied() else {
            return actions;
        };
        let message = match kind {
            StageKind::One => ctx.stages.stage_one(required).map(|stage| {
                ProtocolMessage::StageOne(StageOneGossip {
                    round,
                    stage: stage.clone(),
                })
            }),
            StageKind::Two => ctx.stages.stage_two(required).map(|stage| {
                ProtocolMessage::StageTwo(StageTwoGossip {
                    round,
                    stage: stage.clone(),
                })
            }),
            StageKind::Three => ctx.stages.stage_three(required).map(|stage| {
                ProtocolMessage::StageThree(StageThreeGossip {
                    round,
                    stage: stage.clone(),
                })
            }),
        };
        if let Some(message) = message {
            debug!(%kind, %required, "relaying stored vote");
            actions.push(Action::SendTo { recipient, message });
        }
        actions
    }

    fn on_round_delay_timer(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != StateKind::Waiting {
            return actions;
        }
        warn!("writing-queue slot reached without a new round, taking over");
        self.raise(SolverEvent::SetWriter, &mut actions);
        actions
    }

    fn on_state_expired(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.state.is_timed() {
            return actions;
        }
        warn!(state = self.state.name(), "state expired");
        self.raise(SolverEvent::Expired, &mut actions);
        actions
    }

    fn on_abandoned(&mut self, round: RoundNumber) -> Vec<Action> {
        let mut actions = Vec::new();
        if self
            .round
            .as_ref()
            .is_some_and(|ctx| ctx.round() == round)
        {
            warn!(%round, "consensus abandoned");
            self.round = None;
            self.raise(SolverEvent::BigBang, &mut actions);
        }
        actions
    }
}

impl SubStateMachine for SolverState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        match event {
            Event::RoundTableReceived { table } => Some(self.on_round_table(table)),
            Event::RoundPacketsReady { round } => Some(self.on_packets_ready(*round)),
            Event::StageOneReceived { round, stage } => Some(self.on_stage_one(*round, stage)),
            Event::StageTwoReceived { round, stage } => Some(self.on_stage_two(*round, stage)),
            Event::StageThreeReceived { round, stage } => Some(self.on_stage_three(*round, stage)),
            Event::StageRequestReceived {
                round,
                kind,
                from,
                required,
            } => Some(self.on_stage_request(*round, *kind, *from, *required)),
            Event::StageRequestTimer => Some(self.on_stage_request_timer()),
            Event::NeighborsRequestTimer => Some(self.on_neighbors_request_timer()),
            Event::RoundDelayTimer => Some(self.on_round_delay_timer()),
            Event::StateExpiryTimer => Some(self.on_state_expired()),
            Event::ConsensusAbandoned { round } => Some(self.on_abandoned(*round)),
            Event::WriterNotificationReceived { round, writer } => {
                debug!(%round, %writer, "writer announced");
                Some(Vec::new())
            }
            _ => None,
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troika_types::test_utils::{test_keypair, test_packet};

    fn keys(n: u8) -> Vec<PublicKey> {
        (0..n).map(|i| test_keypair(i).public_key()).collect()
    }

    fn table(round: u64, confidants: Vec<PublicKey>, hashes: Vec<Hash>) -> RoundTable {
        RoundTable {
            round: RoundNumber(round),
            timestamp: 1,
            confidants,
            hashes,
        }
    }

    fn solver(seed: u8) -> (SolverState, Arc<Conveyer>) {
        let conveyer = Arc::new(Conveyer::default());
        let config = SolverConfig {
            timeouts_enabled: false,
            ..SolverConfig::default()
        };
        let mut solver = SolverState::new(test_keypair(seed), config, conveyer.clone());
        solver.start();
        (solver, conveyer)
    }

    #[test]
    fn trusted_member_enters_stage_one() {
        let (mut solver, _) = solver(0);
        solver.on_round_table(&table(1, keys(4), vec![]));
        assert_eq!(solver.state_kind(), StateKind::TrustedStage1);
    }

    #[test]
    fn outsider_enters_normal() {
        let (mut solver, _) = solver(9);
        solver.on_round_table(&table(1, keys(4), vec![]));
        assert_eq!(solver.state_kind(), StateKind::Normal);
    }

    #[test]
    fn invalid_and_stale_tables_are_ignored() {
        let (mut solver, _) = solver(0);
        // Too few confidants.
        solver.on_round_table(&table(1, keys(2), vec![]));
        assert_eq!(solver.state_kind(), StateKind::NoState);

        solver.on_round_table(&table(5, keys(4), vec![]));
        assert_eq!(solver.state_kind(), StateKind::TrustedStage1);
        // A table that does not advance the round changes nothing.
        let before = solver.state_kind();
        solver.on_round_table(&table(5, keys(4), vec![]));
        assert_eq!(solver.state_kind(), before);
    }

    /// A round table referencing packets the store does not hold yet must
    /// not produce a StageOne vote; the vote goes out only once the packet
    /// sync reports the round ready.
    #[test]
    fn stage_one_waits_for_missing_packets() {
        let (mut solver, conveyer) = solver(0);
        let packet = test_packet(1, 2);
        let hash = packet.hash().unwrap();

        let actions = solver.on_round_table(&table(1, keys(4), vec![hash]));
        assert_eq!(solver.state_kind(), StateKind::TrustedStage1);
        assert!(!actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: ProtocolMessage::StageOne(_)
            }
        )));

        conveyer.submit(packet);
        let actions = solver.on_packets_ready(RoundNumber(1));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: ProtocolMessage::StageOne(_)
            }
        )));
    }

    #[test]
    fn packets_ready_broadcasts_stage_one() {
        let (mut solver, conveyer) = solver(0);
        let hash = conveyer.submit(test_packet(1, 2));
        solver.on_round_table(&table(1, keys(4), vec![hash]));
        let actions = solver.on_packets_ready(RoundNumber(1));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: ProtocolMessage::StageOne(_)
            }
        )));
        assert_eq!(solver.state_kind(), StateKind::TrustedStage1);
    }

    #[test]
    fn forged_stage_one_is_dropped() {
        let (mut solver, _) = solver(0);
        solver.on_round_table(&table(1, keys(4), vec![]));
        let forged = StageOne {
            sender: SenderIndex(1),
            hash: Hash::digest(b"x"),
            trusted_candidates: vec![],
            signature: test_keypair(9).sign(b"unrelated"),
        };
        solver.on_stage_one(RoundNumber(1), &forged);
        assert!(solver
            .round
            .as_ref()
            .unwrap()
            .stages
            .stage_one(SenderIndex(1))
            .is_none());
    }

    /// A confidant whose StageTwo vouches for a signature the slot owner
    /// never produced loses its own seat; the slot owner keeps voting.
    #[test]
    fn forged_stage_two_echo_marks_the_claimant() {
        let confidants = keys(4);
        let (mut solver, conveyer) = solver(0);
        let hash = conveyer.submit(test_packet(1, 2));
        solver.on_round_table(&table(1, confidants.clone(), vec![hash]));
        let actions = solver.on_packets_ready(RoundNumber(1));
        let own_stage_one = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast {
                    message: ProtocolMessage::StageOne(g),
                } => Some(g.stage.clone()),
                _ => None,
            })
            .expect("own stage one broadcast");

        // Confidants 1..3 vote the same digest as node 0.
        let mut stage_ones = vec![own_stage_one];
        for i in 1..4u8 {
            let mut stage = StageOne {
                sender: SenderIndex(i),
                hash: stage_ones[0].hash,
                trusted_candidates: confidants.clone(),
                signature: Signature::zero(),
            };
            stage.signature = test_keypair(i).sign(&stage_one_message(RoundNumber(1), &stage));
            solver.on_stage_one(RoundNumber(1), &stage);
            stage_ones.push(stage);
        }

        let honest: Vec<Signature> = stage_ones.iter().map(|s| s.signature).collect();
        let stage_two = |sender: u8, signatures: Vec<Signature>| {
            let mut stage = StageTwo {
                sender: SenderIndex(sender),
                signatures,
                signature: Signature::zero(),
            };
            stage.signature = test_keypair(sender).sign(&stage_two_message(RoundNumber(1), &stage));
            stage
        };

        // Confidant 1 echoes a stage one that confidant 2 never sent, and
        // signs the forged vector with its own key.
        let mut forged = honest.clone();
        forged[2] = test_keypair(9).sign(b"forged");
        solver.on_stage_two(RoundNumber(1), &stage_two(1, forged));
        solver.on_stage_two(RoundNumber(1), &stage_two(2, honest.clone()));
        let actions = solver.on_stage_two(RoundNumber(1), &stage_two(3, honest));

        let stages = &solver.round.as_ref().unwrap().stages;
        assert!(
            stages.is_untrusted(SenderIndex(1)),
            "echoing sender kept its seat"
        );
        assert!(
            !stages.is_untrusted(SenderIndex(2)),
            "slot owner was wrongly excluded"
        );

        let verdict = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast {
                    message: ProtocolMessage::StageThree(g),
                } => Some(g.stage.clone()),
                _ => None,
            })
            .expect("stage three broadcast");
        assert!(verdict.real_trusted[1].is_invalid());
        assert!(!verdict.real_trusted[2].is_invalid());
    }

    #[test]
    fn expiry_falls_back_to_normal() {
        let (mut solver, _) = solver(0);
        solver.on_round_table(&table(1, keys(4), vec![]));
        assert_eq!(solver.state_kind(), StateKind::TrustedStage1);
        solver.on_state_expired();
        assert_eq!(solver.state_kind(), StateKind::Normal);
    }

    #[test]
    fn abandonment_clears_the_round() {
        let (mut solver, _) = solver(0);
        solver.on_round_table(&table(1, keys(4), vec![]));
        solver.on_abandoned(RoundNumber(1));
        assert_eq!(solver.state_kind(), StateKind::Normal);
        assert!(solver.round.is_none());
    }

    /// Drive four real solvers through a full round by relaying broadcasts,
    /// checking they all confirm the same block and the writer opens round 2.
    #[test]
    fn four_node_round_confirms_one_block() {
        let confidants = keys(4);
        let mut solvers: Vec<(SolverState, Arc<Conveyer>)> =
            (0..4).map(|i| solver(i as u8)).collect();

        // Same packet everywhere, as gossip would have left it.
        let packet = test_packet(7, 3);
        let hash = packet.hash().unwrap();
        for (_, conveyer) in &solvers {
            conveyer.submit(packet.clone());
        }

        let start = table(1, confidants.clone(), vec![hash]);
        let mut inbox: VecDeque<(usize, Event)> = VecDeque::new();
        for i in 0..4 {
            inbox.push_back((i, Event::RoundTableReceived { table: start.clone() }));
            inbox.push_back((
                i,
                Event::RoundPacketsReady {
                    round: RoundNumber(1),
                },
            ));
        }

        let mut persisted: Vec<Option<troika_types::Block>> = vec![None; 4];
        let mut next_round_opened = false;
        let mut steps = 0;
        while let Some((node, event)) = inbox.pop_front() {
            steps += 1;
            assert!(steps < 10_000, "round did not converge");
            let actions = solvers[node].0.try_handle(&event).unwrap_or_default();
            for action in actions {
                match action {
                    Action::Broadcast { message } => {
                        if let ProtocolMessage::RoundTable(gossip) = &message {
                            if gossip.table.round == RoundNumber(2) {
                                next_round_opened = true;
                            }
                        }
                        for other in 0..4 {
                            if other == node {
                                continue;
                            }
                            if let Some(event) = message_to_event(&message) {
                                inbox.push_back((other, event));
                            }
                        }
                    }
                    Action::EnqueueInternal { event } => inbox.push_back((node, event)),
                    Action::PersistBlock { block } => persisted[node] = Some(block),
                    _ => {}
                }
            }
        }

        let reference = persisted[0].as_ref().expect("node 0 confirmed a block");
        for block in &persisted {
            let block = block.as_ref().expect("every node confirmed");
            assert_eq!(block.hash(), reference.hash());
            assert_eq!(block.sequence, RoundNumber(1));
            assert_eq!(block.transactions.len(), 3);
        }
        assert!(next_round_opened, "the writer opened round 2");
        for (solver, _) in &solvers {
            assert_eq!(solver.last_sequence(), RoundNumber(1));
            assert_eq!(solver.last_hash(), reference.hash());
        }
    }

    fn message_to_event(message: &ProtocolMessage) -> Option<Event> {
        Some(match message {
            ProtocolMessage::StageOne(g) => Event::StageOneReceived {
                round: g.round,
                stage: g.stage.clone(),
            },
            ProtocolMessage::StageTwo(g) => Event::StageTwoReceived {
                round: g.round,
                stage: g.stage.clone(),
            },
            ProtocolMessage::StageThree(g) => Event::StageThreeReceived {
                round: g.round,
                stage: g.stage.clone(),
            },
            ProtocolMessage::RoundTable(g) => Event::RoundTableReceived {
                table: g.table.clone(),
            },
            _ => return None,
        })
    }
}
