use super::{DaBackend, commit_payload, verify_payload_commitment};
use crate::cert::{
    BatchHeader, BatchMetadata, BlobHeader, BlobInfo, BlobVerificationProof, G1Commitment,
    QuorumBlobParam, VersionByte, VersionedCert,
};
use crate::config::BackendVersion;
use crate::ephemeral::EphemeralStore;
use crate::error::{ProxyError, Result};
use crate::hash::HASH_LENGTH;
use crate::verify::{
    CommitmentProver, Verifier, batch_header_hash, blob_leaf_hash, no_nil_fields,
    process_inclusion_proof,
};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;

/// Quorums every synthesized cert claims, with the thresholds used for each.
const SYNTHETIC_QUORUMS: [u8; 2] = [0, 1];
const SYNTHETIC_ADVERSARY_THRESHOLD: u8 = 33;
const SYNTHETIC_CONFIRMATION_THRESHOLD: u8 = 55;
const SYNTHETIC_PROOF_DEPTH: usize = 2;

/// Legacy-protocol backend that keeps blobs in an [`EphemeralStore`].
///
/// Certificates carry a real commitment over the encoded payload and
/// internally consistent batch metadata, so they pass full verification
/// with any snapshot that accepts quorums 0 and 1 at 33/55.
pub struct MemstoreV1 {
    store: EphemeralStore,
    verifier: Arc<Verifier>,
    prover: Arc<dyn CommitmentProver>,
}

impl MemstoreV1 {
    pub fn new(
        store: EphemeralStore,
        verifier: Arc<Verifier>,
        prover: Arc<dyn CommitmentProver>,
    ) -> Self {
        Self {
            store,
            verifier,
            prover,
        }
    }
}

/// Builds a legacy cert around `commitment` whose batch hash, inclusion
/// proof and quorum parameters are mutually consistent.
pub(crate) fn synthesize_legacy_cert(commitment: G1Commitment, data_length: u32) -> Result<BlobInfo> {
    let mut rng = rand::thread_rng();

    let blob_header = BlobHeader {
        commitment: Some(commitment),
        data_length,
        quorum_blob_params: SYNTHETIC_QUORUMS
            .iter()
            .map(|&quorum_number| QuorumBlobParam {
                quorum_number,
                adversary_threshold_percentage: SYNTHETIC_ADVERSARY_THRESHOLD,
                confirmation_threshold_percentage: SYNTHETIC_CONFIRMATION_THRESHOLD,
                chunk_length: 1,
            })
            .collect(),
    };

    let blob_index: u32 = rng.gen_range(0..(1 << SYNTHETIC_PROOF_DEPTH));
    let mut inclusion_proof = vec![0u8; SYNTHETIC_PROOF_DEPTH * HASH_LENGTH];
    rng.fill(&mut inclusion_proof[..]);
    let batch_root = process_inclusion_proof(
        &inclusion_proof,
        blob_leaf_hash(&blob_header)?,
        u64::from(blob_index),
    )?;

    let reference_block_number: u32 = rng.gen_range(1..u32::MAX / 2);
    let batch_header = BatchHeader {
        batch_root: batch_root.to_vec(),
        quorum_numbers: SYNTHETIC_QUORUMS.to_vec(),
        quorum_signed_percentages: vec![100; SYNTHETIC_QUORUMS.len()],
        reference_block_number,
    };

    let mut signatory_record_hash = vec![0u8; HASH_LENGTH];
    rng.fill(&mut signatory_record_hash[..]);

    Ok(BlobInfo {
        blob_verification_proof: Some(BlobVerificationProof {
            batch_id: rng.r#gen(),
            blob_index,
            batch_metadata: Some(BatchMetadata {
                batch_header_hash: batch_header_hash(&batch_header)?.to_vec(),
                batch_header: Some(batch_header),
                signatory_record_hash,
                fee: vec![0],
                confirmation_block_number: reference_block_number + 1,
            }),
            inclusion_proof,
            quorum_indexes: (0..SYNTHETIC_QUORUMS.len() as u8).collect(),
        }),
        blob_header: Some(blob_header),
    })
}

#[async_trait]
impl DaBackend for MemstoreV1 {
    fn version(&self) -> BackendVersion {
        BackendVersion::V1
    }

    fn name(&self) -> &'static str {
        "memstore_v1"
    }

    async fn put(&self, payload: Bytes) -> Result<VersionedCert> {
        let (commitment, _) = commit_payload(self.prover.as_ref(), &payload)?;
        let data_length = u32::try_from(payload.len()).map_err(|_| ProxyError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;

        let info = synthesize_legacy_cert(commitment, data_length)?;
        let cert = VersionedCert::new(VersionByte::Legacy, info.to_bytes()?);
        self.store
            .insert_entry(cert.blob_key().as_bytes(), payload)
            .await?;

        Ok(cert)
    }

    async fn get(&self, cert: &VersionedCert) -> Result<Bytes> {
        let payload = self.store.fetch_entry(cert.blob_key().as_bytes()).await?;
        self.verify_payload(cert, &payload)?;
        Ok(payload)
    }

    fn verify_cert(&self, cert: &VersionedCert) -> Result<()> {
        self.verifier.verify_cert(&cert.to_legacy()?)
    }

    fn verify_payload(&self, cert: &VersionedCert, payload: &[u8]) -> Result<()> {
        let info = cert.to_legacy()?;
        let parts = no_nil_fields(&info)?;
        verify_payload_commitment(&self.verifier, parts.commitment, payload)
    }
}
