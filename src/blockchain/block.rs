use serde::{Deserialize, Serialize};

use super::chain::BlockchainError;
use super::hashing::{concat, sha256};
use super::proof::ProofOfWork;
use super::storage::StorageError;
use super::transaction::Transaction;

/// Represents a block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Hash found by mining; empty until mined
    pub hash: Vec<u8>,

    /// Transactions included in this block, in order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block; empty only for genesis
    pub prev_hash: Vec<u8>,

    /// Nonce that produced `hash`
    pub nonce: u64,
}

impl Block {
    /// Mines a new block on top of `prev_hash`
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `prev_hash` - The hash of the previous block, empty for genesis
    /// * `pow` - The proof-of-work engine fixing the difficulty
    ///
    /// # Returns
    ///
    /// The mined block with `hash` and `nonce` filled in
    pub fn create(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        pow: &ProofOfWork,
    ) -> Result<Self, BlockchainError> {
        let mut block = Block {
            hash: Vec::new(),
            transactions,
            prev_hash,
            nonce: 0,
        };

        let (nonce, hash) = pow.mine(&block)?;
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Mines the first block of a ledger around its coinbase transaction
    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork) -> Result<Self, BlockchainError> {
        Block::create(vec![coinbase], Vec::new(), pow)
    }

    /// Flat SHA-256 over the concatenated transaction ids, in block order
    pub fn hash_transactions(&self) -> Vec<u8> {
        let ids: Vec<&[u8]> = self.transactions.iter().map(|tx| tx.id.as_slice()).collect();
        sha256(&concat(&ids))
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Checks both that the stored hash matches the block's contents and
    /// that it satisfies the work target
    pub fn verify(&self, pow: &ProofOfWork) -> bool {
        self.hash == pow.compute_hash(self) && pow.validate(self)
    }

    /// Encodes the block for storage
    pub fn serialize(&self) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(self).map_err(|e| StorageError::EncodingFailure(e.to_string()))
    }

    /// Decodes a block previously produced by `serialize`
    pub fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::CorruptRecord(e.to_string()))
    }
}
