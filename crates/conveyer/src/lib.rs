//! Transaction packet conveyer.
//!
//! The conveyer is the node's packet store: it holds sealed transaction
//! packets for upcoming rounds, answers hash lookups during block assembly,
//! and keeps a bounded history of past rounds so lagging peers can still
//! synchronize.
//!
//! [`Conveyer`] is the shared store; [`ConveyerState`] is the sub-state-machine
//! that speaks the synchronization protocol over it.

mod state;
mod store;

pub use state::ConveyerState;
pub use store::{Conveyer, RoundSnapshot, DEFAULT_HISTORY_ROUNDS};
