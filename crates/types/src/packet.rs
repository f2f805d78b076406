//! Transactions and transaction packets.

use crate::{Hash, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from packet mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The packet hash has been computed; contents are immutable.
    #[error("packet is sealed, contents are immutable")]
    Sealed,
}

/// A single value transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Originating wallet key; also the signer.
    pub source: PublicKey,
    /// Receiving wallet key.
    pub target: PublicKey,
    /// Transferred amount.
    pub amount: u64,
    /// Source-scoped id that makes otherwise identical transfers distinct.
    pub inner_id: u64,
    /// Source's signature over the canonical transaction bytes.
    pub signature: Signature,
}

impl Transaction {
    /// Build and sign a transaction in one step.
    pub fn new_signed(source: &KeyPair, target: PublicKey, amount: u64, inner_id: u64) -> Self {
        let mut tx = Self {
            source: source.public_key(),
            target,
            amount,
            inner_id,
            signature: Signature::zero(),
        };
        tx.signature = source.sign(&tx.signing_bytes());
        tx
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 32 + 8 + 8);
        bytes.extend_from_slice(self.source.as_bytes());
        bytes.extend_from_slice(self.target.as_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&self.inner_id.to_le_bytes());
        bytes
    }

    /// Verify the source's signature.
    pub fn verify_signature(&self) -> bool {
        self.source.verify(&self.signing_bytes(), &self.signature)
    }

    /// Canonical bytes including the signature, used for content digests.
    pub fn content_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signing_bytes();
        bytes.extend_from_slice(&self.signature.to_bytes());
        bytes
    }
}

/// An ordered sequence of transactions with a lazily computed content hash.
///
/// A packet with no hash is "unsealed" and may still be mutated. Sealing
/// computes the digest over the serialized transaction sequence exactly once;
/// the hash is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsPacket {
    transactions: Vec<Transaction>,
    hash: Option<Hash>,
}

impl TransactionsPacket {
    /// Create an empty unsealed packet.
    pub fn new() -> Self {
        Self {
            transactions: Vec::new(),
            hash: None,
        }
    }

    /// Create an unsealed packet from a transaction list.
    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions,
            hash: None,
        }
    }

    /// The ordered transactions.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Number of transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the packet holds no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Whether the content hash has been computed.
    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    /// The content hash, if sealed.
    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    /// Append a transaction to an unsealed packet.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), PacketError> {
        if self.is_sealed() {
            return Err(PacketError::Sealed);
        }
        self.transactions.push(tx);
        Ok(())
    }

    /// Compute the content hash, sealing the packet.
    ///
    /// Idempotent: a second call returns the already-computed hash without
    /// re-digesting.
    pub fn seal(&mut self) -> Hash {
        if let Some(hash) = self.hash {
            return hash;
        }
        let mut bytes = Vec::new();
        for tx in &self.transactions {
            bytes.extend_from_slice(&tx.content_bytes());
        }
        let hash = Hash::digest(&bytes);
        self.hash = Some(hash);
        hash
    }
}

impl Default for TransactionsPacket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_keypair, test_transaction};

    #[test]
    fn transaction_signature_verifies() {
        let tx = test_transaction(1, 0);
        assert!(tx.verify_signature());
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let mut tx = test_transaction(1, 0);
        tx.amount += 1;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn seal_computes_hash_exactly_once() {
        let mut packet = TransactionsPacket::new();
        packet.add_transaction(test_transaction(1, 0)).unwrap();
        let first = packet.seal();
        let second = packet.seal();
        assert_eq!(first, second);
        assert!(packet.is_sealed());
    }

    #[test]
    fn sealed_packet_rejects_mutation() {
        let mut packet = TransactionsPacket::new();
        packet.add_transaction(test_transaction(1, 0)).unwrap();
        packet.seal();
        let result = packet.add_transaction(test_transaction(2, 0));
        assert_eq!(result, Err(PacketError::Sealed));
        assert_eq!(packet.len(), 1);
    }

    #[test]
    fn identical_content_yields_identical_hash() {
        let source = test_keypair(3);
        let target = test_keypair(4).public_key();
        let tx = Transaction::new_signed(&source, target, 10, 1);

        let mut a = TransactionsPacket::from_transactions(vec![tx.clone()]);
        let mut b = TransactionsPacket::from_transactions(vec![tx]);
        assert_eq!(a.seal(), b.seal());
    }
}
