//! Solver configuration.

use std::time::Duration;

/// Tuning knobs for the consensus driver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Whether states arm an expiry timer and stages escalate re-requests.
    ///
    /// Disabled in deterministic tests that drive every event by hand.
    pub timeouts_enabled: bool,

    /// Whether re-entering the current state runs its exit/enter hooks again.
    pub repeat_state_enabled: bool,

    /// How long any consensus state may run before it is expired.
    pub state_timeout: Duration,

    /// First-tier delay before missing stage votes are re-requested
    /// point-to-point.
    pub stage_request_timeout: Duration,

    /// Per-slot delay of the writing queue: the node at queue position `k`
    /// takes over writing after `k * round_delay` without a new round.
    pub round_delay: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeouts_enabled: true,
            repeat_state_enabled: false,
            state_timeout: Duration::from_secs(10),
            stage_request_timeout: Duration::from_millis(500),
            round_delay: Duration::from_millis(1000),
        }
    }
}
