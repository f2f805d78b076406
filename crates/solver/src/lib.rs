//! Three-stage consensus state machine.
//!
//! This crate implements the per-round voting protocol as a synchronous,
//! event-driven model:
//!
//! - `Event::RoundTableReceived` → Enter the round as trusted or normal
//! - `Event::RoundPacketsReady` → Build and broadcast the StageOne vote
//! - `Event::StageOneReceived` → Collect proposals, advance to StageTwo
//! - `Event::StageTwoReceived` → Collect signature echoes, advance to StageThree
//! - `Event::StageThreeReceived` → Collect verdicts, confirm the block
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Round**: One attempt to produce the block at the next chain position.
//!   Round N produces the block with sequence N.
//!
//! - **Confidant**: A member of the round's trusted set, listed in the round
//!   table. Identified within the round by its [`SenderIndex`].
//!
//! - **Characteristic**: A per-round bitmask over the ordered transaction
//!   sequence selecting which transactions enter the block. Nodes vote on its
//!   digest in StageOne.
//!
//! - **Liar**: A confidant whose StageOne digest disagrees with the majority,
//!   or whose StageOne broadcast was observed to differ between receivers.
//!
//! - **Writer**: The confidant deterministically elected in StageThree to
//!   persist the block and open the next round.
//!
//! [`SenderIndex`]: troika_types::SenderIndex

mod assembler;
mod config;
mod election;
mod stage_store;
mod state;

pub use assembler::{AssemblyError, BlockAssembler};
pub use config::SolverConfig;
pub use election::{
    analyze_solutions, elect_trusted, elect_writer, optimal_trusted_count, writing_queue,
    AnalysisError, SolutionAnalysis,
};
pub use stage_store::{StageOutcome, StageStore};
pub use state::{SolverState, StateKind};
