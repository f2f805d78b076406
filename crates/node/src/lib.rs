//! Node composition.
//!
//! Combines the packet conveyer and the consensus solver into the single
//! [`StateMachine`] that runners drive.

mod state;

pub use state::NodeStateMachine;
