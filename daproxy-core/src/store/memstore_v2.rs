use super::{DaBackend, commit_payload, verify_payload_commitment};
use crate::cert::{BatchHeaderV2, BlobHeaderV2, CertV2, VersionByte, VersionedCert};
use crate::config::BackendVersion;
use crate::ephemeral::EphemeralStore;
use crate::error::{ProxyError, Result};
use crate::hash::{HASH_LENGTH, Hash32};
use crate::verify::{CommitmentProver, Verifier, valid_field_lengths_v2};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;

const BLOB_VERSION: u16 = 0;

/// Blob length in field elements as carried by the header.
fn header_length(elements: usize) -> Result<u32> {
    u32::try_from(elements).map_err(|_| ProxyError::PayloadTooLarge {
        size: elements,
        max: u32::MAX as usize,
    })
}

/// Current-protocol backend that keeps blobs in an [`EphemeralStore`].
/// Batch fields are random; only the commitment is meaningful.
pub struct MemstoreV2 {
    store: EphemeralStore,
    verifier: Arc<Verifier>,
    prover: Arc<dyn CommitmentProver>,
}

impl MemstoreV2 {
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

    fn synthesize_cert(&self, payload: &[u8]) -> Result<CertV2> {
        let (commitment, elements) = commit_payload(self.prover.as_ref(), payload)?;
        let mut rng = rand::thread_rng();

        let mut inclusion_proof = vec![0u8; 4 * HASH_LENGTH];
        rng.fill(&mut inclusion_proof[..]);

        Ok(CertV2 {
            blob_header: BlobHeaderV2 {
                version: BLOB_VERSION,
                quorum_numbers: vec![0, 1],
                commitment,
                length: header_length(elements)?,
                payment_header_hash: rng.r#gen::<Hash32>(),
            },
            blob_index: rng.r#gen(),
            inclusion_proof,
            batch_header: BatchHeaderV2 {
                batch_root: rng.r#gen::<Hash32>(),
                reference_block_number: rng.gen_range(1..u32::MAX / 2),
            },
            signed_quorum_numbers: vec![0, 1],
        })
    }
}

#[async_trait]
impl DaBackend for MemstoreV2 {
    fn version(&self) -> BackendVersion {
        BackendVersion::V2
    }

    fn name(&self) -> &'static str {
        "memstore_v2"
    }

    async fn put(&self, payload: Bytes) -> Result<VersionedCert> {
        let cert = self.synthesize_cert(&payload)?;
        let cert = VersionedCert::new(VersionByte::V2, cert.to_bytes()?);
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
        valid_field_lengths_v2(&cert.to_v2()?)?;
        Ok(())
    }

    fn verify_payload(&self, cert: &VersionedCert, payload: &[u8]) -> Result<()> {
        let cert = cert.to_v2()?;
        verify_payload_commitment(&self.verifier, &cert.blob_header.commitment, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemstoreConfig, SafeConfig, VerifierConfig};
    use crate::error::DerivationError;
    use crate::verify::DigestCommitter;

    fn memstore(config: MemstoreConfig) -> MemstoreV2 {
        let prover = Arc::new(DigestCommitter::new(1 << 16));
        let verifier = Verifier::new(VerifierConfig::default(), prover.clone(), None).unwrap();
        MemstoreV2::new(
            EphemeralStore::new(SafeConfig::new(config)),
            Arc::new(verifier),
            prover,
        )
    }

    #[tokio::test]
    async fn test_put_get() {
        let backend = memstore(MemstoreConfig::default());
        let payload = Bytes::from(vec![42u8; 1000]);
        let cert = backend.put(payload.clone()).await.unwrap();

        assert_eq!(cert.version, VersionByte::V2);
        backend.verify_cert(&cert).unwrap();
        assert_eq!(backend.get(&cert).await.unwrap(), payload);
        assert_eq!(cert.to_v2().unwrap().blob_header.length, 1 + 1000usize.div_ceil(31) as u32);
    }

    #[tokio::test]
    async fn test_derivation_error_surfaces_on_get() {
        let backend = memstore(MemstoreConfig {
            put_with_get_returns_derivation_error: Some(DerivationError {
                status_code: 4,
                msg: "invalid cert".to_string(),
            }),
            ..Default::default()
        });
        let cert = backend.put(Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(
            backend.get(&cert).await.unwrap_err(),
            ProxyError::Derivation(_)
        ));
    }

    #[test]
    fn test_header_length_does_not_truncate() {
        assert_eq!(header_length(33).unwrap(), 33);
        assert_eq!(header_length(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_header_length_overflow_rejected() {
        let err = header_length(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_legacy_cert_rejected() {
        let backend = memstore(MemstoreConfig::default());
        let cert = VersionedCert::new(VersionByte::Legacy, vec![0u8; 8]);
        assert!(backend.verify_cert(&cert).is_err());
    }
}
