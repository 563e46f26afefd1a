use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use sled::{Batch, Db};
use thiserror::Error;

use super::block::Block;
use super::hashing::to_hex;

/// Reserved key holding the hash of the most recent block
pub const LAST_HASH_KEY: &[u8] = b"lh";

/// Reserved key holding the proof-of-work difficulty the ledger was created with
pub const DIFFICULTY_KEY: &[u8] = b"df";

/// File sled writes into every database directory it creates
const MANIFEST_FILE: &str = "conf";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    #[error("Record not found: {0}")]
    MissingRecord(String),
}

/// Key-value engine backing the ledger
///
/// Keys are block hashes plus the reserved `LAST_HASH_KEY` and
/// `DIFFICULTY_KEY`. Writes passed to `put_all` must become visible together
/// or not at all.
pub trait KvStore {
    /// Human-readable location of the store, used in error messages
    fn describe(&self) -> String;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Writes every entry as one committed unit
    fn put_all(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.put_all(vec![(key.to_vec(), value.to_vec())])
    }

    /// Gets a block by its hash
    fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.get(hash)? {
            Some(bytes) => Block::deserialize(&bytes).map_err(|e| match e {
                StorageError::CorruptRecord(msg) => {
                    StorageError::CorruptRecord(format!("block {}: {}", to_hex(hash), msg))
                }
                other => other,
            }),
            None => Err(StorageError::MissingRecord(format!("block {}", to_hex(hash)))),
        }
    }

    /// Gets the persisted tip hash, if a ledger has been written
    fn get_last_hash(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(LAST_HASH_KEY)
    }

    /// Gets the persisted proof-of-work difficulty, if one has been written
    fn get_difficulty(&self) -> Result<Option<u32>, StorageError> {
        match self.get(DIFFICULTY_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptRecord(format!("difficulty record of {} bytes", bytes.len()))
                })?;
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Saves the genesis block, the tip pointer and the difficulty in one commit
    ///
    /// # Arguments
    ///
    /// * `block` - The genesis block
    /// * `difficulty` - Difficulty every block of the ledger is mined at
    fn save_genesis(&self, block: &Block, difficulty: u32) -> Result<(), StorageError> {
        let value = block.serialize()?;
        self.put_all(vec![
            (block.hash.clone(), value),
            (LAST_HASH_KEY.to_vec(), block.hash.clone()),
            (DIFFICULTY_KEY.to_vec(), difficulty.to_be_bytes().to_vec()),
        ])?;

        debug!("Stored genesis {} at difficulty {}", to_hex(&block.hash), difficulty);
        Ok(())
    }

    /// Saves a block under its hash and moves the tip to it in one commit
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = block.serialize()?;
        self.put_all(vec![
            (block.hash.clone(), value),
            (LAST_HASH_KEY.to_vec(), block.hash.clone()),
        ])?;

        debug!("Stored block {}", to_hex(&block.hash));
        Ok(())
    }
}

/// sled-backed store rooted at a directory
pub struct SledStore {
    db: Db,
    path: PathBuf,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").field("path", &self.path).finish()
    }
}

impl SledStore {
    /// Opens the database at `path`, creating it if necessary
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path).map_err(|e| {
            StorageError::StoreUnavailable(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self { db, path })
    }

    /// Whether a database has already been created at `path`
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join(MANIFEST_FILE).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for SledStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn put_all(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        for (key, value) in entries {
            batch.insert(key, value);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Volatile store for tests and throwaway ledgers
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for InMemoryStore {
    fn describe(&self) -> String {
        "in-memory store".to_string()
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::StoreUnavailable("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put_all(&self, new_entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::StoreUnavailable("lock poisoned".to_string()))?;
        entries.extend(new_entries);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
