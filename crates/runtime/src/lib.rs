//! Production runtime for a consensus node.
//!
//! Wraps the synchronous [`NodeStateMachine`] in a tokio event loop: network
//! adapters feed decoded events in through a channel, timers are tokio tasks,
//! and outbound messages leave through an envelope channel for the transport
//! layer to deliver.
//!
//! [`NodeStateMachine`]: troika_node::NodeStateMachine

mod codec;
mod runner;
mod storage;
mod timers;

pub use codec::{decode_message, encode_message, event_for_message, CodecError, WIRE_VERSION};
pub use runner::{NodeRunner, OutboundEnvelope, RunnerError, ShutdownHandle};
pub use storage::{BlockStore, MemoryBlockStore};
pub use timers::TimerManager;

/// Initialize tracing from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
