//! Certificate verification.
//!
//! Checks run cheapest first: presence of every sub-structure, exact field
//! widths, then (when enabled) batch hash, inclusion proof and quorum
//! thresholds, and finally the commitment against the blob itself.

pub mod kzg;
pub mod merkle;

pub use kzg::{CommitmentProver, CommitmentVerifier, DigestCommitter};
pub use merkle::process_inclusion_proof;

use crate::cert::{
    BatchHeader, BatchMetadata, BlobHeader, BlobInfo, BlobVerificationProof, CertV2, G1Commitment,
    encode,
};
use crate::codec;
use crate::config::{Network, VerifierConfig};
use crate::error::{ProxyError, Result, VerificationError};
use crate::hash::{HASH_LENGTH, Hash32, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::sync::Arc;

/// Quorum parameters read from the chain for the current epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertVerifierSnapshot {
    /// Minimum adversary threshold a cert may claim, per quorum.
    #[serde(default, deserialize_with = "quorum_map")]
    pub quorum_adversary_thresholds: HashMap<u8, u8>,
    #[serde(default)]
    pub quorums_required: Vec<u8>,
}

// Config files only produce string map keys.
fn quorum_map<'de, D>(deserializer: D) -> std::result::Result<HashMap<u8, u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HashMap::<String, u8>::deserialize(deserializer)?
        .into_iter()
        .map(|(quorum, threshold)| {
            quorum
                .trim()
                .parse::<u8>()
                .map(|quorum| (quorum, threshold))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Historical block range on one network where the required quorum set was
/// narrower than what the chain reports today.
#[derive(Debug, Clone)]
pub struct QuorumExemption {
    pub network: Network,
    pub reference_blocks: Range<u32>,
    pub required_quorums: &'static [u8],
}

pub const QUORUM_EXEMPTIONS: &[QuorumExemption] = &[QuorumExemption {
    network: Network::Holesky,
    reference_blocks: 2_950_000..2_960_000,
    required_quorums: &[0],
}];

fn required_quorums<'a>(
    snapshot: &'a CertVerifierSnapshot,
    network: Network,
    reference_block: u32,
) -> &'a [u8] {
    let exemption = QUORUM_EXEMPTIONS.iter().find(|exemption| {
        exemption.network == network && exemption.reference_blocks.contains(&reference_block)
    });
    match exemption {
        Some(exemption) => exemption.required_quorums,
        None => &snapshot.quorums_required,
    }
}

/// Borrowed view of a legacy cert whose optional parts are all present.
#[derive(Debug, Clone, Copy)]
pub struct CertParts<'a> {
    pub blob_header: &'a BlobHeader,
    pub commitment: &'a G1Commitment,
    pub proof: &'a BlobVerificationProof,
    pub batch_metadata: &'a BatchMetadata,
    pub batch_header: &'a BatchHeader,
}

pub fn no_nil_fields(cert: &BlobInfo) -> std::result::Result<CertParts<'_>, VerificationError> {
    let proof = cert
        .blob_verification_proof
        .as_ref()
        .ok_or(VerificationError::MissingField("blob verification proof"))?;
    let batch_metadata = proof
        .batch_metadata
        .as_ref()
        .ok_or(VerificationError::MissingField("batch metadata"))?;
    let batch_header = batch_metadata
        .batch_header
        .as_ref()
        .ok_or(VerificationError::MissingField("batch header"))?;
    let blob_header = cert
        .blob_header
        .as_ref()
        .ok_or(VerificationError::MissingField("blob header"))?;
    let commitment = blob_header
        .commitment
        .as_ref()
        .ok_or(VerificationError::MissingField("blob commitment"))?;

    Ok(CertParts {
        blob_header,
        commitment,
        proof,
        batch_metadata,
        batch_header,
    })
}

fn check_width(field: &'static str, value: &[u8]) -> std::result::Result<(), VerificationError> {
    if value.len() != HASH_LENGTH {
        return Err(VerificationError::InvalidFieldLength {
            field,
            expected: HASH_LENGTH,
            actual: value.len(),
        });
    }
    Ok(())
}

pub fn valid_field_lengths(
    cert: &BlobInfo,
) -> std::result::Result<CertParts<'_>, VerificationError> {
    let parts = no_nil_fields(cert)?;

    check_width("batch header hash", &parts.batch_metadata.batch_header_hash)?;
    check_width("commitment x", &parts.commitment.x)?;
    check_width("commitment y", &parts.commitment.y)?;
    check_width(
        "signatory record hash",
        &parts.batch_metadata.signatory_record_hash,
    )?;
    check_width("batch root", &parts.batch_header.batch_root)?;

    Ok(parts)
}

/// Width checks for current-protocol certs. Batch root and payment hash are
/// fixed-size arrays on the wire already.
pub fn valid_field_lengths_v2(cert: &CertV2) -> std::result::Result<(), VerificationError> {
    check_width("commitment x", &cert.blob_header.commitment.x)?;
    check_width("commitment y", &cert.blob_header.commitment.y)?;
    if cert.inclusion_proof.len() % HASH_LENGTH != 0 {
        return Err(VerificationError::InvalidProofLength(
            cert.inclusion_proof.len(),
        ));
    }
    Ok(())
}

pub fn batch_header_hash(batch_header: &BatchHeader) -> Result<Hash32> {
    Ok(keccak256(&encode(batch_header)?))
}

/// Merkle leaf of a blob inside its batch: double Keccak of the header.
pub fn blob_leaf_hash(blob_header: &BlobHeader) -> Result<Hash32> {
    Ok(keccak256(&keccak256(&encode(blob_header)?)))
}

pub fn verify_security_params(
    snapshot: &CertVerifierSnapshot,
    network: Network,
    blob_header: &BlobHeader,
    batch_header: &BatchHeader,
) -> std::result::Result<(), VerificationError> {
    let params = &blob_header.quorum_blob_params;
    if params.len() > batch_header.quorum_numbers.len() {
        return Err(VerificationError::TooManyQuorumParams {
            got: params.len(),
            available: batch_header.quorum_numbers.len(),
        });
    }

    let mut confirmed = BTreeSet::new();
    for (i, param) in params.iter().enumerate() {
        let quorum = param.quorum_number;
        let expected = batch_header.quorum_numbers[i];
        if quorum != expected {
            return Err(VerificationError::QuorumNumberMismatch {
                expected,
                got: quorum,
            });
        }

        let adversary = param.adversary_threshold_percentage;
        let confirmation = param.confirmation_threshold_percentage;
        if adversary > confirmation {
            return Err(VerificationError::ThresholdInversion {
                quorum,
                adversary,
                confirmation,
            });
        }

        match snapshot.quorum_adversary_thresholds.get(&quorum) {
            Some(&required) if adversary < required => {
                return Err(VerificationError::AdversaryThresholdTooLow {
                    quorum,
                    got: adversary,
                    required,
                });
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    "no onchain adversary threshold for quorum, skipping check quorum={}",
                    quorum
                );
            }
        }

        // A batch header without a signed percentage for this position
        // carries no stake for it.
        let signed = batch_header
            .quorum_signed_percentages
            .get(i)
            .copied()
            .unwrap_or(0);
        if signed < confirmation {
            return Err(VerificationError::InsufficientSignedStake {
                quorum,
                signed,
                confirmation,
            });
        }

        confirmed.insert(quorum);
    }

    let required = required_quorums(snapshot, network, batch_header.reference_block_number);
    if let Some(&missing) = required.iter().find(|quorum| !confirmed.contains(*quorum)) {
        return Err(VerificationError::RequiredQuorumMissing(missing));
    }

    Ok(())
}

pub struct Verifier {
    config: VerifierConfig,
    commitments: Arc<dyn CommitmentVerifier>,
    snapshot: Option<CertVerifierSnapshot>,
}

impl Verifier {
    pub fn new(
        config: VerifierConfig,
        commitments: Arc<dyn CommitmentVerifier>,
        snapshot: Option<CertVerifierSnapshot>,
    ) -> Result<Self> {
        if config.verify_certs && snapshot.is_none() {
            return Err(ProxyError::Config(
                "cert verification is enabled but no verifier snapshot was provided".to_string(),
            ));
        }

        Ok(Self {
            config,
            commitments,
            snapshot,
        })
    }

    /// Checks `claimed` against an encoded blob.
    pub fn verify_commitment(&self, claimed: &G1Commitment, blob: &[u8]) -> Result<()> {
        let elements = codec::to_field_elements(blob)?;
        let have = self.commitments.srs_points_loaded();
        if elements.len() > have {
            return Err(VerificationError::InsufficientSrs {
                have,
                need: elements.len(),
            }
            .into());
        }

        if !self.commitments.verify_commitment(claimed, &elements) {
            return Err(VerificationError::CommitmentMismatch.into());
        }

        Ok(())
    }

    pub fn verify_security_params(
        &self,
        blob_header: &BlobHeader,
        batch_header: &BatchHeader,
    ) -> Result<()> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or(VerificationError::SnapshotUnavailable)?;
        verify_security_params(snapshot, self.config.network, blob_header, batch_header)?;
        Ok(())
    }

    /// Structural checks always run. Batch, inclusion and quorum checks run
    /// only with `verify_certs` enabled.
    pub fn verify_cert(&self, cert: &BlobInfo) -> Result<()> {
        let parts = valid_field_lengths(cert)?;
        if !self.config.verify_certs {
            return Ok(());
        }

        let computed = batch_header_hash(parts.batch_header)?;
        if computed.as_slice() != parts.batch_metadata.batch_header_hash.as_slice() {
            return Err(VerificationError::BatchHeaderHashMismatch {
                expected: hex::encode(&parts.batch_metadata.batch_header_hash),
                actual: hex::encode(computed),
            }
            .into());
        }

        let leaf = blob_leaf_hash(parts.blob_header)?;
        let root = process_inclusion_proof(
            &parts.proof.inclusion_proof,
            leaf,
            u64::from(parts.proof.blob_index),
        )?;
        if root.as_slice() != parts.batch_header.batch_root.as_slice() {
            return Err(VerificationError::InclusionProofMismatch {
                expected: hex::encode(&parts.batch_header.batch_root),
                actual: hex::encode(root),
            }
            .into());
        }

        self.verify_security_params(parts.blob_header, parts.batch_header)?;

        tracing::debug!(
            "verified cert batch_id={} blob_index={}",
            parts.proof.batch_id,
            parts.proof.blob_index
        );
        Ok(())
    }

    /// Full check of a serialized legacy cert against the payload it claims.
    pub fn verify(&self, cert_bytes: &[u8], payload: &[u8]) -> Result<()> {
        let cert = BlobInfo::from_bytes(cert_bytes)?;
        self.verify_cert(&cert)?;

        let parts = no_nil_fields(&cert)?;
        let blob = codec::encode_payload(payload)?;
        self.verify_commitment(parts.commitment, &blob)
    }
}
