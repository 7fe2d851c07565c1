use sha3::{Digest, Keccak256};

pub const HASH_LENGTH: usize = 32;

pub type Hash32 = [u8; HASH_LENGTH];

pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 of `left ++ right`.
pub fn keccak256_concat(left: &[u8], right: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
