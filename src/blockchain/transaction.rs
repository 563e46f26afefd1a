use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::BlockchainError;
use super::hashing::{sha256, to_hex};
use super::storage::KvStore;
use super::utxo::UtxoResolver;

/// Amount credited by every coinbase transaction
pub const COINBASE_REWARD: u64 = 100;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_OUT_INDEX: i64 = -1;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Encoding failure: {0}")]
    EncodingFailure(String),
}

/// A value-carrying output, spendable by whoever presents `owner_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub owner_key: String,
}

/// A reference to an earlier output being consumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction holding the consumed output; empty for coinbase
    pub ref_tx_id: Vec<u8>,

    /// Index into that transaction's outputs; -1 for coinbase
    pub ref_out_index: i64,

    /// Identity presented to unlock the output (the memo, for coinbase)
    pub unlock_key: String,
}

/// Represents a transaction in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash of `inputs` and `outputs`
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl TxOutput {
    pub fn new(value: u64, owner_key: impl Into<String>) -> Self {
        TxOutput {
            value,
            owner_key: owner_key.into(),
        }
    }

    /// Whether `identity` owns this output
    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner_key == identity
    }
}

impl TxInput {
    /// Whether this input was authorized by `identity`
    pub fn can_unlock(&self, identity: &str) -> bool {
        self.unlock_key == identity
    }
}

impl Transaction {
    /// Builds a transaction from its parts and stamps its content id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self, TransactionError> {
        let mut tx = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Creates the reward transaction paying `COINBASE_REWARD` to `to`
    ///
    /// An empty memo is replaced with `"Coins to {to}"`.
    pub fn coinbase(to: &str, memo: &str) -> Result<Self, TransactionError> {
        let memo = if memo.is_empty() {
            format!("Coins to {}", to)
        } else {
            memo.to_string()
        };

        let input = TxInput {
            ref_tx_id: Vec::new(),
            ref_out_index: COINBASE_OUT_INDEX,
            unlock_key: memo,
        };

        Transaction::new(vec![input], vec![TxOutput::new(COINBASE_REWARD, to)])
    }

    /// Creates a transaction moving `amount` from `from` to `to`
    ///
    /// Inputs are gathered through the resolver; any surplus over `amount`
    /// is returned to `from` as a second output.
    pub fn new_spend<S: KvStore>(
        from: &str,
        to: &str,
        amount: u64,
        resolver: &UtxoResolver<'_, S>,
    ) -> Result<Self, BlockchainError> {
        if amount == 0 {
            return Err(TransactionError::InvalidAmount("amount must be positive".to_string()).into());
        }

        let (accumulated, selection) = resolver.spendable_outputs_for(from, amount)?;

        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: accumulated,
            }
            .into());
        }

        let mut inputs = Vec::new();
        for (tx_id, out_indices) in selection {
            let ref_tx_id = hex::decode(&tx_id)
                .map_err(|e| TransactionError::EncodingFailure(format!("bad id {}: {}", tx_id, e)))?;

            for out_index in out_indices {
                inputs.push(TxInput {
                    ref_tx_id: ref_tx_id.clone(),
                    ref_out_index: out_index as i64,
                    unlock_key: from.to_string(),
                });
            }
        }

        let mut outputs = vec![TxOutput::new(amount, to)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from));
        }

        Ok(Transaction::new(inputs, outputs)?)
    }

    /// Checks if the transaction is a coinbase (reward) transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].ref_tx_id.is_empty()
            && self.inputs[0].ref_out_index == COINBASE_OUT_INDEX
    }

    /// Hex form of the id, used as the key of spent/selected maps
    pub fn id_hex(&self) -> String {
        to_hex(&self.id)
    }

    /// Total value carried by the outputs
    ///
    /// # Returns
    ///
    /// `InvalidAmount` if the total does not fit in a `u64`
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.outputs.iter().try_fold(0u64, |total, out| {
            total.checked_add(out.value).ok_or_else(|| {
                TransactionError::InvalidAmount(format!("outputs of {} overflow", self.id_hex()))
            })
        })
    }

    fn compute_id(&self) -> Result<Vec<u8>, TransactionError> {
        let encoded = bincode::serialize(&(&self.inputs, &self.outputs))
            .map_err(|e| TransactionError::EncodingFailure(e.to_string()))?;
        Ok(sha256(&encoded))
    }
}
