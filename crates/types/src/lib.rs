//! Core types for Troika consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures
//! - **Identifiers**: RoundNumber, SenderIndex
//! - **Round types**: RoundTable, TransactionsPacket, Characteristic
//! - **Block types**: Block, DeferredBlock, PoolMetaInfo
//! - **Stage types**: StageOne, StageTwo, StageThree
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod block;
mod characteristic;
mod crypto;
mod hash;
mod identifiers;
mod packet;
mod round;
mod signing;
mod stage;

pub use block::{Block, DeferredBlock, PoolMetaInfo};
pub use characteristic::Characteristic;
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::Hash;
pub use identifiers::{RoundNumber, SenderIndex};
pub use packet::{PacketError, Transaction, TransactionsPacket};
pub use round::{RoundTable, MIN_CONFIDANTS};
pub use signing::{
    stage_one_message, stage_three_message, stage_two_message, DOMAIN_STAGE_ONE,
    DOMAIN_STAGE_THREE, DOMAIN_STAGE_TWO,
};
pub use stage::{StageKind, StageOne, StageThree, StageTwo};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed([seed; 32])
    }

    /// Create a signed test transaction between two seeded keys.
    pub fn test_transaction(source_seed: u8, inner_id: u64) -> Transaction {
        let source = test_keypair(source_seed);
        let target = test_keypair(source_seed.wrapping_add(1)).public_key();
        Transaction::new_signed(&source, target, 100 + inner_id, inner_id)
    }

    /// Create a sealed test packet with `count` transactions.
    pub fn test_packet(source_seed: u8, count: u64) -> TransactionsPacket {
        let mut packet = TransactionsPacket::new();
        for i in 0..count {
            packet
                .add_transaction(test_transaction(source_seed, i))
                .expect("packet is unsealed");
        }
        packet.seal();
        packet
    }
}
