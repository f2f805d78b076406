//! Deterministic block assembly from a characteristic.

use std::sync::Arc;
use thiserror::Error;
use troika_conveyer::Conveyer;
use troika_types::{Block, Characteristic, Hash, PoolMetaInfo, RoundTable, Transaction};

/// Errors from block assembly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    /// A packet the round table references is not in the store.
    #[error("packet {0} referenced by the round table was not found")]
    PacketNotFound(Hash),
}

/// Builds blocks by applying a characteristic to the round's packets.
///
/// Assembly is a pure function of the store contents, the round table, and
/// the characteristic: every honest confidant that runs it produces a
/// byte-identical block. Re-running it for a later iteration of the same
/// round reproduces the same transaction selection.
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    conveyer: Arc<Conveyer>,
}

impl BlockAssembler {
    /// Create an assembler over the shared packet store.
    pub fn new(conveyer: Arc<Conveyer>) -> Self {
        Self { conveyer }
    }

    /// Apply the characteristic to the round's ordered transactions.
    ///
    /// Walks the table's packets in order, copying every transaction whose
    /// position the mask selects. A mask shorter or longer than the actual
    /// transaction count is tolerated with a warning; surplus positions are
    /// treated as excluded.
    pub fn assemble(
        &self,
        meta: &PoolMetaInfo,
        table: &RoundTable,
        characteristic: &Characteristic,
    ) -> Result<Block, AssemblyError> {
        let mut transactions: Vec<Transaction> = Vec::new();
        let mut position = 0usize;
        for hash in &table.hashes {
            let packet = self
                .conveyer
                .lookup(hash)
                .ok_or(AssemblyError::PacketNotFound(*hash))?;
            for tx in packet.transactions() {
                if characteristic.is_included(position) {
                    transactions.push(tx.clone());
                }
                position += 1;
            }
        }

        if position != characteristic.len() {
            tracing::warn!(
                mask_len = characteristic.len(),
                transactions = position,
                "characteristic length does not match round transaction count"
            );
        }

        Ok(Block {
            sequence: meta.sequence,
            previous_hash: meta.previous_hash,
            timestamp: meta.timestamp,
            writer: meta.writer,
            confidants: table.confidants.clone(),
            real_trusted: meta.real_trusted.clone(),
            transactions,
            signatures: Vec::new(),
        })
    }
}
