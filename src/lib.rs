//! Single-node, persistent, proof-of-work ledger with UTXO-based transfers.

pub mod blockchain;
pub mod cli;
pub mod config;

pub use blockchain::{
    Block, BlockchainError, ChainIterator, Ledger, ProofOfWork, Transaction, TxInput, TxOutput,
    UtxoResolver,
};
pub use config::Config;
