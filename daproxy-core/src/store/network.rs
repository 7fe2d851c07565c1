use super::DaBackend;
use crate::cert::{BlobInfo, VersionByte, VersionedCert};
use crate::codec;
use crate::config::BackendVersion;
use crate::error::{ProxyError, Result};
use crate::verify::{Verifier, no_nil_fields, valid_field_lengths};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Client for the legacy disperser. The wire protocol lives elsewhere.
#[async_trait]
pub trait DisperserClient: Send + Sync {
    /// Disperses an encoded blob and waits for its certificate.
    async fn disperse_blob(&self, blob: Bytes) -> Result<BlobInfo>;

    /// Fetches the encoded blob identified by its batch and index.
    async fn retrieve_blob(&self, batch_header_hash: &[u8], blob_index: u32) -> Result<Bytes>;
}

pub struct NetworkV1Store {
    client: Arc<dyn DisperserClient>,
    verifier: Arc<Verifier>,
    put_retries: usize,
    max_blob_size_bytes: usize,
}

impl NetworkV1Store {
    pub fn new(
        client: Arc<dyn DisperserClient>,
        verifier: Arc<Verifier>,
        put_retries: usize,
        max_blob_size_bytes: usize,
    ) -> Self {
        Self {
            client,
            verifier,
            put_retries: put_retries.max(1),
            max_blob_size_bytes,
        }
    }

    async fn disperse(&self, blob: Bytes) -> Result<BlobInfo> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.disperse_blob(blob.clone()).await {
                Ok(info) => return Ok(info),
                Err(error @ ProxyError::Failover(_)) => return Err(error),
                Err(error) if attempt >= self.put_retries => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        "blob dispersal failed, retrying attempt={} max={} error={}",
                        attempt,
                        self.put_retries,
                        error
                    );
                }
            }
        }
    }
}

#[async_trait]
impl DaBackend for NetworkV1Store {
    fn version(&self) -> BackendVersion {
        BackendVersion::V1
    }

    fn name(&self) -> &'static str {
        "network_v1"
    }

    async fn put(&self, payload: Bytes) -> Result<VersionedCert> {
        if payload.len() > self.max_blob_size_bytes {
            return Err(ProxyError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_blob_size_bytes,
            });
        }

        let blob = Bytes::from(codec::encode_payload(&payload)?);
        let info = self.disperse(blob.clone()).await?;

        // The disperser is not trusted either.
        let parts = valid_field_lengths(&info)?;
        self.verifier.verify_commitment(parts.commitment, &blob)?;
        self.verifier.verify_cert(&info)?;

        Ok(VersionedCert::new(VersionByte::Legacy, info.to_bytes()?))
    }

    async fn get(&self, cert: &VersionedCert) -> Result<Bytes> {
        let info = cert.to_legacy()?;
        let parts = valid_field_lengths(&info)?;

        let blob = self
            .client
            .retrieve_blob(&parts.batch_metadata.batch_header_hash, parts.proof.blob_index)
            .await?;
        self.verifier.verify_commitment(parts.commitment, &blob)?;

        Ok(Bytes::from(codec::decode_blob(&blob)?))
    }

    fn verify_cert(&self, cert: &VersionedCert) -> Result<()> {
        self.verifier.verify_cert(&cert.to_legacy()?)
    }

    fn verify_payload(&self, cert: &VersionedCert, payload: &[u8]) -> Result<()> {
        let info = cert.to_legacy()?;
        let parts = no_nil_fields(&info)?;
        super::verify_payload_commitment(&self.verifier, parts.commitment, payload)
    }
}
