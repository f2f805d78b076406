//! Production runner implementation.
//!
//! Owns the node state machine and drives it from a single tokio loop:
//!
//! 1. Pull the next event (internal queue first, then the channel)
//! 2. Hand it to the state machine
//! 3. Execute the returned actions (send, arm timers, persist)
//!
//! Network transports live outside the runner. They decode received bytes
//! with [`decode_message`](crate::decode_message) and push the resulting
//! events into the runner's channel; outbound envelopes flow the other way.

use crate::{encode_message, BlockStore, TimerManager};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use troika_core::{Action, Event, StateMachine};
use troika_node::NodeStateMachine;
use troika_types::PublicKey;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("event channel closed")]
    ChannelClosed,
}

/// An encoded message leaving the node.
///
/// `recipient` of `None` means broadcast; the transport layer resolves
/// point-to-point recipients to connections.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    /// Target node, or `None` for broadcast.
    pub recipient: Option<PublicKey>,
    /// Wire bytes, already versioned and encoded.
    pub bytes: Vec<u8>,
}

/// Handle for shutting down a running [`NodeRunner`].
///
/// When dropped, signals the runner to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Asynchronous driver around the synchronous node state machine.
pub struct NodeRunner<S: BlockStore> {
    node: NodeStateMachine,
    storage: S,
    timers: TimerManager,
    event_rx: mpsc::Receiver<Event>,
    outbound_tx: mpsc::Sender<OutboundEnvelope>,
    shutdown_rx: oneshot::Receiver<()>,
    /// Internal events jump the channel queue to preserve causality.
    internal: VecDeque<Event>,
    started_at: Instant,
}

impl<S: BlockStore> NodeRunner<S> {
    /// Create a runner and the channels its environment talks through.
    ///
    /// Returns the runner, the sender for inbound events, the receiver for
    /// outbound envelopes, and the shutdown handle.
    pub fn new(
        node: NodeStateMachine,
        storage: S,
        channel_capacity: usize,
    ) -> (
        Self,
        mpsc::Sender<Event>,
        mpsc::Receiver<OutboundEnvelope>,
        ShutdownHandle,
    ) {
        let (event_tx, event_rx) = mpsc::channel(channel_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let runner = Self {
            node,
            storage,
            timers: TimerManager::new(event_tx.clone()),
            event_rx,
            outbound_tx,
            shutdown_rx,
            internal: VecDeque::new(),
            started_at: Instant::now(),
        };
        let handle = ShutdownHandle {
            tx: Some(shutdown_tx),
        };
        (runner, event_tx, outbound_rx, handle)
    }

    /// Run until shutdown is signalled or the event channel closes.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        info!("node runner started");
        loop {
            let event = if let Some(event) = self.internal.pop_front() {
                event
            } else {
                tokio::select! {
                    biased;
                    _ = &mut self.shutdown_rx => {
                        info!("shutdown requested");
                        self.timers.cancel_all();
                        return Ok(());
                    }
                    received = self.event_rx.recv() => {
                        received.ok_or(RunnerError::ChannelClosed)?
                    }
                }
            };

            self.node.set_time(self.started_at.elapsed());
            let actions = self.node.handle(event);
            for action in actions {
                self.execute(action).await;
            }
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Broadcast { message } => match encode_message(&message) {
                Ok(bytes) => {
                    let envelope = OutboundEnvelope {
                        recipient: None,
                        bytes,
                    };
                    if self.outbound_tx.send(envelope).await.is_err() {
                        warn!("outbound channel closed, dropping broadcast");
                    }
                }
                Err(err) => error!(%err, "failed to encode broadcast"),
            },
            Action::SendTo { recipient, message } => match encode_message(&message) {
                Ok(bytes) => {
                    let envelope = OutboundEnvelope {
                        recipient: Some(recipient),
                        bytes,
                    };
                    if self.outbound_tx.send(envelope).await.is_err() {
                        warn!(%recipient, "outbound channel closed, dropping message");
                    }
                }
                Err(err) => error!(%err, "failed to encode message"),
            },
            Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
            Action::CancelTimer { id } => self.timers.cancel_timer(id),
            Action::EnqueueInternal { event } => {
                debug!(event = event.type_name(), "internal event enqueued");
                self.internal.push_back(event);
            }
            Action::PersistBlock { block } => {
                info!(sequence = %block.sequence, "persisting block");
                self.storage.put_block(block);
            }
        }
    }

    /// Time since the runner was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlockStore;
    use troika_solver::SolverConfig;
    use troika_types::test_utils::{test_keypair, test_transaction};

    #[tokio::test]
    async fn submission_leaves_as_broadcast_envelope() {
        let node = NodeStateMachine::new(test_keypair(0), SolverConfig::default());
        let (runner, event_tx, mut outbound_rx, shutdown) =
            NodeRunner::new(node, MemoryBlockStore::new(), 64);
        let task = tokio::spawn(runner.run());

        event_tx
            .send(Event::SubmitTransaction {
                tx: test_transaction(1, 0),
            })
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(envelope.recipient.is_none());
        assert_eq!(envelope.bytes[0], crate::WIRE_VERSION);

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }
}
