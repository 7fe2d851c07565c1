use super::{G1Commitment, decode, encode};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumBlobParam {
    pub quorum_number: u8,
    pub adversary_threshold_percentage: u8,
    pub confirmation_threshold_percentage: u8,
    pub chunk_length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub commitment: Option<G1Commitment>,
    pub data_length: u32,
    pub quorum_blob_params: Vec<QuorumBlobParam>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub batch_root: Vec<u8>,
    pub quorum_numbers: Vec<u8>,
    pub quorum_signed_percentages: Vec<u8>,
    pub reference_block_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_header: Option<BatchHeader>,
    pub signatory_record_hash: Vec<u8>,
    pub fee: Vec<u8>,
    pub confirmation_block_number: u32,
    pub batch_header_hash: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobVerificationProof {
    pub batch_id: u32,
    pub blob_index: u32,
    pub batch_metadata: Option<BatchMetadata>,
    /// Concatenated 32-byte sibling hashes, leaf to root.
    pub inclusion_proof: Vec<u8>,
    pub quorum_indexes: Vec<u8>,
}

/// Legacy certificate. Sub-structures are optional on the wire so a
/// certificate with a missing part decodes and is then rejected by the
/// structural checks instead of failing inside the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub blob_header: Option<BlobHeader>,
    pub blob_verification_proof: Option<BlobVerificationProof>,
}

impl BlobInfo {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn commitment(&self) -> Option<&G1Commitment> {
        self.blob_header.as_ref()?.commitment.as_ref()
    }

    pub fn batch_header(&self) -> Option<&BatchHeader> {
        self.blob_verification_proof
            .as_ref()?
            .batch_metadata
            .as_ref()?
            .batch_header
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parts_survive_decoding() {
        let info = BlobInfo {
            blob_header: Some(BlobHeader {
                commitment: None,
                data_length: 4,
                quorum_blob_params: vec![],
            }),
            blob_verification_proof: None,
        };

        let decoded = BlobInfo::from_bytes(&info.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, info);
        assert!(decoded.commitment().is_none());
        assert!(decoded.batch_header().is_none());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = BlobInfo::from_bytes(&[0xff; 7]).unwrap_err();
        assert!(err.is_fatal_cert_error());
    }
}
