use crate::error::VerificationError;
use crate::hash::{HASH_LENGTH, Hash32, keccak256_concat};

/// Recomputes a Keccak-256 Merkle root from `leaf` and a flat buffer of
/// sibling hashes ordered leaf to root.
///
/// An empty proof yields the leaf itself. The returned hash still has to be
/// compared against a root obtained independently.
pub fn process_inclusion_proof(
    proof: &[u8],
    leaf: Hash32,
    index: u64,
) -> Result<Hash32, VerificationError> {
    if proof.len() % HASH_LENGTH != 0 {
        return Err(VerificationError::InvalidProofLength(proof.len()));
    }

    let mut computed = leaf;
    let mut index = index;
    for sibling in proof.chunks_exact(HASH_LENGTH) {
        computed = if index & 1 == 0 {
            keccak256_concat(&computed, sibling)
        } else {
            keccak256_concat(sibling, &computed)
        };
        index >>= 1;
    }

    Ok(computed)
}
