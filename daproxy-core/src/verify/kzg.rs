//! Commitment capability consumed by the verifier.
//!
//! Pairing arithmetic lives outside this crate. Production deployments plug
//! a KZG implementation in through [`CommitmentVerifier`]; the bundled
//! [`DigestCommitter`] is a deterministic hash-based stand-in used by the
//! in-memory backends and tests. It is NOT a polynomial commitment.

use crate::cert::G1Commitment;
use crate::codec::FieldElement;
use crate::error::Result;
use crate::hash::keccak256_concat;
use sha3::{Digest, Keccak256};

pub trait CommitmentVerifier: Send + Sync {
    /// Number of SRS G1 points currently loaded. A blob with more field
    /// elements than this cannot be checked.
    fn srs_points_loaded(&self) -> usize;

    fn verify_commitment(&self, claimed: &G1Commitment, elements: &[FieldElement]) -> bool;
}

/// Backends that mint certificates also need to produce commitments.
pub trait CommitmentProver: CommitmentVerifier {
    fn commit(&self, elements: &[FieldElement]) -> Result<G1Commitment>;
}

/// Lets a shared prover stand wherever only verification is needed.
impl CommitmentVerifier for std::sync::Arc<dyn CommitmentProver> {
    fn srs_points_loaded(&self) -> usize {
        (**self).srs_points_loaded()
    }

    fn verify_commitment(&self, claimed: &G1Commitment, elements: &[FieldElement]) -> bool {
        (**self).verify_commitment(claimed, elements)
    }
}

#[derive(Debug, Clone)]
pub struct DigestCommitter {
    srs_points: usize,
}

impl DigestCommitter {
    pub fn new(srs_points: usize) -> Self {
        Self { srs_points }
    }

    fn digest(elements: &[FieldElement]) -> G1Commitment {
        let mut hasher = Keccak256::new();
        hasher.update(b"G1X");
        for element in elements {
            hasher.update(element);
        }
        let x: [u8; 32] = hasher.finalize().into();
        let y = keccak256_concat(b"G1Y", &x);

        G1Commitment {
            x: x.to_vec(),
            y: y.to_vec(),
        }
    }
}

impl CommitmentVerifier for DigestCommitter {
    fn srs_points_loaded(&self) -> usize {
        self.srs_points
    }

    fn verify_commitment(&self, claimed: &G1Commitment, elements: &[FieldElement]) -> bool {
        Self::digest(elements) == *claimed
    }
}

impl CommitmentProver for DigestCommitter {
    fn commit(&self, elements: &[FieldElement]) -> Result<G1Commitment> {
        Ok(Self::digest(elements))
    }
}
