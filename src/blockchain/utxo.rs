use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use super::chain::{BlockchainError, Ledger};
use super::hashing::to_hex;
use super::storage::KvStore;
use super::transaction::{Transaction, TransactionError, TxOutput};

/// Selected outputs keyed by hex transaction id
pub type OutputSelection = BTreeMap<String, Vec<usize>>;

/// Reconstructs unspent outputs by replaying the ledger from tip to genesis
///
/// No index is kept: every query walks the whole chain once.
pub struct UtxoResolver<'a, S: KvStore> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: KvStore> UtxoResolver<'a, S> {
    /// Creates a resolver reading from `ledger`
    ///
    /// # Arguments
    ///
    /// * `ledger` - The ledger whose blocks are replayed on every query
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        UtxoResolver { ledger }
    }

    /// Transactions holding at least one unspent output owned by `address`,
    /// in discovery order (newest block first)
    pub fn unspent_transactions_for(&self, address: &str) -> Result<Vec<Transaction>, BlockchainError> {
        Ok(self
            .collect_unspent(address)?
            .into_iter()
            .map(|(tx, _)| tx)
            .collect())
    }

    /// Unspent outputs owned by `address`
    pub fn unspent_outputs_for(&self, address: &str) -> Result<Vec<TxOutput>, BlockchainError> {
        let mut outputs = Vec::new();
        for (tx, indices) in self.collect_unspent(address)? {
            outputs.extend(indices.into_iter().map(|i| tx.outputs[i].clone()));
        }
        Ok(outputs)
    }

    /// Sum of the unspent outputs owned by `address`
    ///
    /// Fails with `InvalidAmount` when the sum does not fit in a `u64`.
    pub fn balance_of(&self, address: &str) -> Result<u64, BlockchainError> {
        let mut balance = 0u64;
        for out in self.unspent_outputs_for(address)? {
            balance = checked_total(balance, out.value, address)?;
        }
        Ok(balance)
    }

    /// Greedily picks unspent outputs until their total reaches `amount`
    ///
    /// Returns the accumulated total together with the picked output
    /// indices per transaction. An under-funded request is not an error
    /// here: the total simply stays below `amount`.
    pub fn spendable_outputs_for(
        &self,
        address: &str,
        amount: u64,
    ) -> Result<(u64, OutputSelection), BlockchainError> {
        let mut accumulated = 0u64;
        let mut selection = OutputSelection::new();

        'work: for (tx, indices) in self.collect_unspent(address)? {
            for index in indices {
                if accumulated >= amount {
                    break 'work;
                }

                accumulated = checked_total(accumulated, tx.outputs[index].value, address)?;
                selection.entry(tx.id_hex()).or_default().push(index);
            }
        }

        debug!(
            "Selected {} for {} of {} requested",
            accumulated, address, amount
        );
        Ok((accumulated, selection))
    }

    /// Walks the chain once, returning each transaction with its unspent
    /// output indices owned by `address`
    ///
    /// Within a block, every input is recorded as spent before any output of
    /// that block is collected.
    fn collect_unspent(&self, address: &str) -> Result<Vec<(Transaction, Vec<usize>)>, BlockchainError> {
        let mut spent: HashMap<String, HashSet<i64>> = HashMap::new();
        let mut unspent = Vec::new();

        for block in self.ledger.iterator() {
            let block = block?;

            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in tx.inputs.iter().filter(|input| input.can_unlock(address)) {
                    spent
                        .entry(to_hex(&input.ref_tx_id))
                        .or_default()
                        .insert(input.ref_out_index);
                }
            }

            for tx in block.transactions {
                let spent_outputs = spent.get(&tx.id_hex());
                let indices: Vec<usize> = tx
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(index, out)| {
                        out.is_owned_by(address)
                            && !spent_outputs.map_or(false, |s| s.contains(&(*index as i64)))
                    })
                    .map(|(index, _)| index)
                    .collect();

                if !indices.is_empty() {
                    unspent.push((tx, indices));
                }
            }
        }

        Ok(unspent)
    }
}

fn checked_total(total: u64, value: u64, address: &str) -> Result<u64, TransactionError> {
    total
        .checked_add(value)
        .ok_or_else(|| TransactionError::InvalidAmount(format!("unspent total of {} overflows", address)))
}
