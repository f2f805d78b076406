//! State machine traits.

use crate::{Action, Event};
use std::time::Duration;

/// A complete, runnable state machine.
///
/// Implemented by the top-level node composition; runners drive it by
/// delivering events and executing the returned actions.
pub trait StateMachine {
    /// Process one event, mutating internal state and returning the actions
    /// the runner must execute.
    fn handle(&mut self, event: Event) -> Vec<Action>;
}

/// A component state machine composed into a larger one.
///
/// `try_handle` lets the composer route each event to the first (or every)
/// sub-machine that claims it; `None` means the event is not this
/// sub-machine's concern.
pub trait SubStateMachine {
    /// Handle the event if it belongs to this sub-machine.
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>>;

    /// Advance this sub-machine's notion of the current time.
    fn set_time(&mut self, now: Duration);
}
