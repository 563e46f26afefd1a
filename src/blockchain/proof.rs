use log::debug;

use super::block::Block;
use super::chain::BlockchainError;
use super::hashing::{be64, concat, sha256, to_hex, HASH_LEN};

/// Difficulty used when none is configured
pub const DEFAULT_DIFFICULTY: u32 = 18;

/// Attempts between two mining progress log lines
const PROGRESS_INTERVAL: u64 = 1 << 16;

/// Proof-of-work engine at a fixed difficulty
///
/// A hash satisfies the work requirement when, read as a big-endian
/// 256-bit integer, it is strictly below `1 << (256 - difficulty)`.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: u32,
    target: [u8; HASH_LEN],
}

impl ProofOfWork {
    /// Creates an engine; `difficulty` must lie in `1..=255`
    pub fn new(difficulty: u32) -> Result<Self, BlockchainError> {
        if difficulty == 0 || difficulty >= 256 {
            return Err(BlockchainError::InvalidDifficulty(difficulty));
        }

        let bit = (256 - difficulty) as usize;
        let mut target = [0u8; HASH_LEN];
        target[HASH_LEN - 1 - bit / 8] = 1 << (bit % 8);

        Ok(ProofOfWork { difficulty, target })
    }

    /// Number of leading zero bits required of a block hash
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// The target as big-endian bytes
    pub fn target(&self) -> &[u8; HASH_LEN] {
        &self.target
    }

    /// Searches nonces upward from 0 for the first hash below target
    ///
    /// Blocks the calling thread until a nonce is found.
    pub fn mine(&self, block: &Block) -> Result<(u64, Vec<u8>), BlockchainError> {
        let tx_hash = block.hash_transactions();

        for nonce in 0..=i64::MAX as u64 {
            let hash = self.hash_with(&block.prev_hash, &tx_hash, nonce);

            if self.meets_target(&hash) {
                debug!("Mined nonce {} with hash {}", nonce, to_hex(&hash));
                return Ok((nonce, hash));
            }

            if nonce > 0 && nonce % PROGRESS_INTERVAL == 0 {
                debug!("Mining: {} attempts, last hash {}", nonce, to_hex(&hash));
            }
        }

        Err(BlockchainError::InvalidBlock(
            "nonce space exhausted without meeting target".to_string(),
        ))
    }

    /// Recomputes the block's hash from its own fields and checks it against target
    ///
    /// Only the recomputed hash is tested; use `Block::verify` to also
    /// compare it with the stored `hash`.
    pub fn validate(&self, block: &Block) -> bool {
        self.meets_target(&self.compute_hash(block))
    }

    fn hash_with(&self, prev_hash: &[u8], tx_hash: &[u8], nonce: u64) -> Vec<u8> {
        let data = concat(&[
            prev_hash,
            tx_hash,
            &be64(nonce)[..],
            &be64(u64::from(self.difficulty))[..],
        ]);
        sha256(&data)
    }

    /// Recomputes the hash a block would carry for its current fields and nonce
    pub fn compute_hash(&self, block: &Block) -> Vec<u8> {
        self.hash_with(&block.prev_hash, &block.hash_transactions(), block.nonce)
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        // big-endian byte order makes lexicographic order numeric order
        hash.len() == HASH_LEN && hash < &self.target[..]
    }
}
