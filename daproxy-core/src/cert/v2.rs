use super::{G1Commitment, decode, encode};
use crate::error::Result;
use crate::hash::Hash32;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeaderV2 {
    pub version: u16,
    pub quorum_numbers: Vec<u8>,
    pub commitment: G1Commitment,
    /// Blob length in field elements.
    pub length: u32,
    pub payment_header_hash: Hash32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeaderV2 {
    pub batch_root: Hash32,
    pub reference_block_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertV2 {
    pub blob_header: BlobHeaderV2,
    pub blob_index: u32,
    pub inclusion_proof: Vec<u8>,
    pub batch_header: BatchHeaderV2,
    pub signed_quorum_numbers: Vec<u8>,
}

impl CertV2 {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }
}
