use sha2::{Digest, Sha256};

/// Length in bytes of every hash produced by the ledger
pub const HASH_LEN: usize = 32;

/// Computes the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Encodes an integer as 8 big-endian bytes
pub fn be64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Concatenates byte slices in order into a single pre-image
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut joined = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        joined.extend_from_slice(part);
    }
    joined
}

/// Renders a hash for logs and CLI output; an empty hash renders as an empty string
pub fn to_hex(hash: &[u8]) -> String {
    hex::encode(hash)
}
