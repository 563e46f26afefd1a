use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use super::block::Block;
use super::hashing::to_hex;
use super::proof::ProofOfWork;
use super::storage::{InMemoryStore, KvStore, SledStore, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::utxo::UtxoResolver;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Ledger already exists at {0}")]
    AlreadyExists(String),

    #[error("No existing ledger found at {0}")]
    NotFound(String),

    #[error("Invalid difficulty {0}: must be between 1 and 255")]
    InvalidDifficulty(u32),

    #[error("Ledger was created at difficulty {stored}, cannot open it at {requested}")]
    DifficultyMismatch { stored: u32, requested: u32 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of walking the whole ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of blocks reachable from the tip
    pub blocks: usize,

    /// Whether every block passed proof-of-work and linked to a stored parent
    pub valid: bool,
}

/// Append-only chain of mined blocks over a key-value store
///
/// The ledger assumes a single writer; `append` takes `&mut self` and the
/// store arbitrates any other process.
#[derive(Debug)]
pub struct Ledger<S: KvStore = SledStore> {
    /// Hash of the most recent block
    tip_hash: Vec<u8>,

    /// Persistent block store
    store: Arc<S>,

    pow: ProofOfWork,
}

impl Ledger<SledStore> {
    /// Whether a ledger store is present at `path`
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        SledStore::exists(path)
    }

    /// Creates a new on-disk ledger whose genesis block rewards `address`
    ///
    /// # Arguments
    ///
    /// * `path` - Directory of the store; must not hold a ledger yet
    /// * `address` - Receiver of the genesis reward
    /// * `memo` - Memo carried by the genesis coinbase input
    /// * `difficulty` - Fixed proof-of-work difficulty of this ledger
    pub fn initialize<P: AsRef<Path>>(
        path: P,
        address: &str,
        memo: &str,
        difficulty: u32,
    ) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        if Self::exists(path) {
            return Err(BlockchainError::AlreadyExists(path.display().to_string()));
        }

        // mine before touching disk so a bad difficulty leaves nothing behind
        let pow = ProofOfWork::new(difficulty)?;
        let genesis = Block::genesis(Transaction::coinbase(address, memo)?, &pow)?;

        std::fs::create_dir_all(path)?;
        let store = SledStore::open(path)?;
        let ledger = Self::with_genesis(store, genesis, pow)?;

        info!("Created ledger at {}", path.display());
        Ok(ledger)
    }

    /// Opens an existing on-disk ledger
    ///
    /// # Arguments
    ///
    /// * `path` - Directory of an existing store
    /// * `difficulty` - Expected difficulty, or `None` to use the stored one
    ///
    /// # Returns
    ///
    /// `DifficultyMismatch` when `difficulty` differs from the one the
    /// ledger was created with
    pub fn reopen<P: AsRef<Path>>(path: P, difficulty: Option<u32>) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        if !Self::exists(path) {
            return Err(BlockchainError::NotFound(path.display().to_string()));
        }

        let store = SledStore::open(path)?;
        let ledger = Self::open(store, difficulty)?;

        info!(
            "Opened ledger at {} with tip {} at difficulty {}",
            path.display(),
            to_hex(&ledger.tip_hash),
            ledger.difficulty()
        );
        Ok(ledger)
    }
}

impl Ledger<InMemoryStore> {
    /// Creates a throwaway ledger kept entirely in memory
    pub fn in_memory(address: &str, difficulty: u32) -> Result<Self, BlockchainError> {
        let pow = ProofOfWork::new(difficulty)?;
        let genesis = Block::genesis(Transaction::coinbase(address, "")?, &pow)?;
        Self::with_genesis(InMemoryStore::new(), genesis, pow)
    }
}

impl<S: KvStore> Ledger<S> {
    /// Starts a ledger in an empty store by persisting `genesis` as the tip
    pub fn create_in(store: S, address: &str, memo: &str, difficulty: u32) -> Result<Self, BlockchainError> {
        if store.get_last_hash()?.is_some() {
            return Err(BlockchainError::AlreadyExists(store.describe()));
        }

        let pow = ProofOfWork::new(difficulty)?;
        let genesis = Block::genesis(Transaction::coinbase(address, memo)?, &pow)?;
        Self::with_genesis(store, genesis, pow)
    }

    /// Resumes a ledger from the tip persisted in `store`
    ///
    /// The stored difficulty wins; an explicit `difficulty` must match it.
    /// Stores written without a difficulty record need an explicit one.
    pub fn open(store: S, difficulty: Option<u32>) -> Result<Self, BlockchainError> {
        let tip_hash = store
            .get_last_hash()?
            .ok_or_else(|| BlockchainError::NotFound(store.describe()))?;

        let difficulty = match (store.get_difficulty()?, difficulty) {
            (Some(stored), Some(requested)) if stored != requested => {
                return Err(BlockchainError::DifficultyMismatch { stored, requested });
            }
            (Some(stored), _) => stored,
            (None, Some(requested)) => requested,
            (None, None) => {
                return Err(StorageError::MissingRecord("difficulty".to_string()).into());
            }
        };
        let pow = ProofOfWork::new(difficulty)?;

        Ok(Ledger {
            tip_hash,
            store: Arc::new(store),
            pow,
        })
    }

    fn with_genesis(store: S, genesis: Block, pow: ProofOfWork) -> Result<Self, BlockchainError> {
        store.save_genesis(&genesis, pow.difficulty())?;
        info!("Genesis created: {}", to_hex(&genesis.hash));

        Ok(Ledger {
            tip_hash: genesis.hash,
            store: Arc::new(store),
            pow,
        })
    }

    /// Hash of the most recently appended block
    pub fn tip_hash(&self) -> &[u8] {
        &self.tip_hash
    }

    /// Difficulty every block of this ledger is mined and checked at
    pub fn difficulty(&self) -> u32 {
        self.pow.difficulty()
    }

    /// The ledger's proof-of-work parameters
    ///
    /// # Returns
    ///
    /// The `ProofOfWork` used by `append` to mine and by `verify` to check blocks
    pub fn proof_of_work(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Mines `transactions` into a block on top of the tip and persists it
    ///
    /// The block and the new tip pointer are written in one commit; if the
    /// commit fails the in-memory tip is left unchanged.
    pub fn append(&mut self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let block = Block::create(transactions, self.tip_hash.clone(), &self.pow)?;

        self.store.save_block(&block)?;
        self.tip_hash = block.hash.clone();

        info!(
            "Appended block {} with {} transaction(s)",
            to_hex(&block.hash),
            block.transactions.len()
        );
        Ok(block)
    }

    /// Moves `amount` from `from` to `to` in a new single-transaction block
    pub fn send(&mut self, from: &str, to: &str, amount: u64) -> Result<Block, BlockchainError> {
        let tx = Transaction::new_spend(from, to, amount, &self.resolver())?;
        self.append(vec![tx])
    }

    /// A cursor positioned at the current tip
    pub fn iterator(&self) -> ChainIterator<S> {
        ChainIterator {
            current_hash: self.tip_hash.clone(),
            store: Arc::clone(&self.store),
        }
    }

    /// Every block from the tip back to genesis, newest first
    pub fn blocks(&self) -> Result<Vec<Block>, BlockchainError> {
        self.iterator().collect()
    }

    /// Unspent-output queries over this ledger
    pub fn resolver(&self) -> UtxoResolver<'_, S> {
        UtxoResolver::new(self)
    }

    /// Walks the ledger checking proof-of-work and parent links
    pub fn verify(&self) -> Result<ChainReport, BlockchainError> {
        let mut report = ChainReport {
            blocks: 0,
            valid: true,
        };

        let mut iter = self.iterator();
        loop {
            let block = match iter.next_block() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(BlockchainError::Storage(StorageError::MissingRecord(msg))) => {
                    warn!("Broken link: {}", msg);
                    report.valid = false;
                    break;
                }
                Err(err) => return Err(err),
            };

            report.blocks += 1;
            if !block.verify(&self.pow) {
                warn!("Block {} fails proof-of-work", to_hex(&block.hash));
                report.valid = false;
            }
        }

        Ok(report)
    }

    /// Flushes pending writes to durable storage
    pub fn flush(&self) -> Result<(), BlockchainError> {
        self.store.flush()?;
        Ok(())
    }
}

impl<S: KvStore> Drop for Ledger<S> {
    fn drop(&mut self) {
        if let Err(err) = self.store.flush() {
            warn!("Failed to flush ledger store on close: {}", err);
        }
    }
}

/// Backward cursor from a starting hash to the genesis block
///
/// Each step is a lookup of `current_hash` in the store; the cursor holds
/// no other state and can be restarted from any hash.
#[derive(Debug)]
pub struct ChainIterator<S: KvStore> {
    current_hash: Vec<u8>,
    store: Arc<S>,
}

impl<S: KvStore> Clone for ChainIterator<S> {
    fn clone(&self) -> Self {
        ChainIterator {
            current_hash: self.current_hash.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore> ChainIterator<S> {
    /// Hash of the block the next step will return; empty once past genesis
    pub fn current_hash(&self) -> &[u8] {
        &self.current_hash
    }

    /// Repositions the cursor at `hash`
    pub fn restart(&mut self, hash: Vec<u8>) {
        self.current_hash = hash;
    }

    /// Loads the current block and steps to its predecessor
    ///
    /// Returns `None` once the genesis block has been returned.
    pub fn next_block(&mut self) -> Result<Option<Block>, BlockchainError> {
        if self.current_hash.is_empty() {
            return Ok(None);
        }

        let block = self.store.get_block(&self.current_hash)?;
        self.current_hash = block.prev_hash.clone();
        Ok(Some(block))
    }
}

impl<S: KvStore> Iterator for ChainIterator<S> {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_block() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => None,
            Err(err) => {
                // stop after reporting a broken link
                self.current_hash.clear();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::{TxInput, TxOutput};
    use tempfile::TempDir;

    const DIFFICULTY: u32 = 8;

    fn payload(tag: &str) -> Transaction {
        Transaction::coinbase(tag, tag).unwrap()
    }

    #[test]
    fn test_in_memory_ledger_has_genesis() {
        let ledger = Ledger::in_memory("alice", DIFFICULTY).unwrap();
        let blocks = ledger.blocks().unwrap();

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_genesis());
        assert_eq!(blocks[0].hash, ledger.tip_hash());
        assert_eq!(blocks[0].transactions[0].outputs, vec![TxOutput::new(100, "alice")]);
    }

    #[test]
    fn test_append_traverses_newest_first() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        let genesis_hash = ledger.tip_hash().to_vec();

        let mut appended = Vec::new();
        for tag in ["one", "two", "three"] {
            appended.push(ledger.append(vec![payload(tag)]).unwrap());
        }

        let blocks = ledger.blocks().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], appended[2]);
        assert_eq!(blocks[1], appended[1]);
        assert_eq!(blocks[2], appended[0]);
        assert_eq!(blocks[3].hash, genesis_hash);
        assert!(blocks[3].is_genesis());

        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash);
        }
        assert_eq!(blocks.iter().filter(|b| b.prev_hash.is_empty()).count(), 1);
    }

    #[test]
    fn test_iterator_is_finite_and_restartable() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        ledger.append(vec![payload("one")]).unwrap();

        let mut iter = ledger.iterator();
        let newest = iter.next_block().unwrap().unwrap();
        let genesis = iter.next_block().unwrap().unwrap();
        assert!(genesis.is_genesis());
        assert!(iter.current_hash().is_empty());
        assert!(iter.next_block().unwrap().is_none());

        iter.restart(newest.hash.clone());
        assert_eq!(iter.next_block().unwrap().unwrap(), newest);
    }

    #[test]
    fn test_iterator_is_snapshot_of_tip() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        let iter = ledger.iterator();
        ledger.append(vec![payload("later")]).unwrap();

        assert_eq!(iter.count(), 1);
        assert_eq!(ledger.iterator().count(), 2);
    }

    #[test]
    fn test_chain_integrity_and_verify() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        ledger.append(vec![payload("one")]).unwrap();
        ledger.append(vec![payload("two")]).unwrap();

        let blocks = ledger.blocks().unwrap();
        for block in blocks.iter().filter(|b| !b.is_genesis()) {
            let parent = ledger.store.get_block(&block.prev_hash).unwrap();
            assert_eq!(parent.hash, block.prev_hash);
        }

        assert_eq!(ledger.verify().unwrap(), ChainReport { blocks: 3, valid: true });
    }

    #[test]
    fn test_verify_flags_tampered_block() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        let mut block = ledger.append(vec![payload("one")]).unwrap();

        block.transactions[0] = payload("forged");
        ledger
            .store
            .put(&block.hash, &block.serialize().unwrap())
            .unwrap();

        let report = ledger.verify().unwrap();
        assert_eq!(report.blocks, 2);
        assert!(!report.valid);
    }

    #[test]
    fn test_verify_flags_missing_parent() {
        let store = InMemoryStore::new();
        let pow = ProofOfWork::new(DIFFICULTY).unwrap();
        let orphan = Block::create(vec![payload("orphan")], vec![3; 32], &pow).unwrap();
        store.save_block(&orphan).unwrap();

        let ledger = Ledger::open(store, Some(DIFFICULTY)).unwrap();
        let report = ledger.verify().unwrap();
        assert_eq!(report, ChainReport { blocks: 1, valid: false });

        let mut iter = ledger.iterator();
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(BlockchainError::Storage(StorageError::MissingRecord(_))))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_corrupt_record_stops_traversal() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        let block = ledger.append(vec![payload("one")]).unwrap();
        ledger.store.put(&block.prev_hash, b"garbage").unwrap();

        assert!(matches!(
            ledger.blocks(),
            Err(BlockchainError::Storage(StorageError::CorruptRecord(_)))
        ));
        assert!(ledger.verify().is_err());
    }

    #[test]
    fn test_open_empty_store_fails() {
        let result = Ledger::open(InMemoryStore::new(), Some(DIFFICULTY));
        assert!(matches!(result, Err(BlockchainError::NotFound(ref at)) if at == "in-memory store"));
    }

    #[test]
    fn test_open_uses_stored_difficulty() {
        let store = InMemoryStore::new();
        let pow = ProofOfWork::new(DIFFICULTY).unwrap();
        let genesis = Block::genesis(payload("A"), &pow).unwrap();
        store.save_genesis(&genesis, DIFFICULTY).unwrap();

        let ledger = Ledger::open(store, None).unwrap();
        assert_eq!(ledger.difficulty(), DIFFICULTY);
        assert_eq!(ledger.verify().unwrap(), ChainReport { blocks: 1, valid: true });
    }

    #[test]
    fn test_open_without_any_difficulty_fails() {
        let store = InMemoryStore::new();
        let pow = ProofOfWork::new(DIFFICULTY).unwrap();
        store
            .save_block(&Block::genesis(payload("A"), &pow).unwrap())
            .unwrap();

        assert!(matches!(
            Ledger::open(store, None),
            Err(BlockchainError::Storage(StorageError::MissingRecord(_)))
        ));
    }

    #[test]
    fn test_create_in_refuses_populated_store() {
        let store = InMemoryStore::new();
        store.put(b"lh", &[1; 32]).unwrap();

        let result = Ledger::create_in(store, "A", "", DIFFICULTY);
        assert!(matches!(result, Err(BlockchainError::AlreadyExists(_))));
    }

    #[test]
    fn test_send_appends_spend_block() {
        let mut ledger = Ledger::in_memory("A", DIFFICULTY).unwrap();
        let genesis_tx = ledger.blocks().unwrap()[0].transactions[0].clone();

        let block = ledger.send("A", "B", 40).unwrap();
        assert_eq!(block.transactions.len(), 1);

        let tx = &block.transactions[0];
        assert_eq!(
            tx.inputs,
            vec![TxInput {
                ref_tx_id: genesis_tx.id.clone(),
                ref_out_index: 0,
                unlock_key: "A".to_string(),
            }]
        );
        assert_eq!(tx.total_output().unwrap(), 100);
    }

    #[test]
    fn test_initialize_and_reopen_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks");

        assert!(!Ledger::exists(&path));
        let tip = {
            let mut ledger = Ledger::initialize(&path, "A", "genesis", DIFFICULTY).unwrap();
            ledger.send("A", "B", 25).unwrap();
            ledger.tip_hash().to_vec()
        };
        assert!(Ledger::exists(&path));

        let ledger = Ledger::reopen(&path, None).unwrap();
        assert_eq!(ledger.difficulty(), DIFFICULTY);
        assert_eq!(ledger.tip_hash(), tip.as_slice());
        assert_eq!(ledger.blocks().unwrap().len(), 2);
        assert!(ledger.verify().unwrap().valid);
        assert_eq!(ledger.resolver().balance_of("B").unwrap(), 25);
    }

    #[test]
    fn test_initialize_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks");

        drop(Ledger::initialize(&path, "A", "", DIFFICULTY).unwrap());
        let result = Ledger::initialize(&path, "B", "", DIFFICULTY);
        assert!(matches!(result, Err(BlockchainError::AlreadyExists(_))));

        let ledger = Ledger::reopen(&path, Some(DIFFICULTY)).unwrap();
        assert_eq!(ledger.blocks().unwrap().len(), 1);
        assert_eq!(ledger.resolver().balance_of("A").unwrap(), 100);
    }

    #[test]
    fn test_reopen_missing_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nothing-here");

        let result = Ledger::reopen(&path, Some(DIFFICULTY));
        assert!(matches!(result, Err(BlockchainError::NotFound(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_initialize_rejects_bad_difficulty_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks");

        let result = Ledger::initialize(&path, "A", "", 0);
        assert!(matches!(result, Err(BlockchainError::InvalidDifficulty(0))));
        assert!(!path.exists());
    }

    #[test]
    fn test_reopen_at_other_difficulty_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks");

        let tip = {
            let ledger = Ledger::initialize(&path, "A", "", DIFFICULTY).unwrap();
            ledger.tip_hash().to_vec()
        };

        let result = Ledger::reopen(&path, Some(DIFFICULTY + 1));
        assert!(matches!(
            result,
            Err(BlockchainError::DifficultyMismatch { stored: DIFFICULTY, requested }) if requested == DIFFICULTY + 1
        ));

        // nothing was mined on top of the existing chain
        let ledger = Ledger::reopen(&path, None).unwrap();
        assert_eq!(ledger.tip_hash(), tip.as_slice());
        assert_eq!(ledger.verify().unwrap(), ChainReport { blocks: 1, valid: true });
        assert_eq!(ledger.resolver().balance_of("A").unwrap(), 100);
    }
}
