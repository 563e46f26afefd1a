// Blockchain module
//
// This module contains the ledger core:
// - Hashing and encoding helpers
// - Transaction structure and UTXO resolution
// - Proof of work algorithm
// - Block structure
// - Persistent chain and its storage engine

pub mod block;
pub mod chain;
pub mod hashing;
pub mod proof;
pub mod storage;
pub mod transaction;
pub mod utxo;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{BlockchainError, ChainIterator, ChainReport, Ledger};
pub use proof::{ProofOfWork, DEFAULT_DIFFICULTY};
pub use storage::{InMemoryStore, KvStore, SledStore, StorageError};
pub use transaction::{Transaction, TransactionError, TxInput, TxOutput, COINBASE_REWARD};
pub use utxo::{OutputSelection, UtxoResolver};
