use super::DaBackend;
use crate::cert::VersionedCert;
use crate::config::BackendVersion;
use crate::error::{ProxyError, Result};
use crate::secondary::{ObjectStoreSecondary, SecondaryManager, SecondaryStore};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const DISPERSAL_V1: u8 = 1;
const DISPERSAL_V2: u8 = 2;

fn encode_version(version: BackendVersion) -> u8 {
    match version {
        BackendVersion::V1 => DISPERSAL_V1,
        BackendVersion::V2 => DISPERSAL_V2,
    }
}

fn decode_version(raw: u8) -> BackendVersion {
    if raw == DISPERSAL_V1 {
        BackendVersion::V1
    } else {
        BackendVersion::V2
    }
}

/// Routes writes to the dispersal backend and reads to the backend named by
/// each certificate's version byte, with secondary tiers around both.
pub struct StorageManager {
    v1: Option<Arc<dyn DaBackend>>,
    v2: Option<Arc<dyn DaBackend>>,
    dispersal: AtomicU8,
    secondary: SecondaryManager,
    /// S3 target holding keccak commitments, where key = keccak256(value).
    keccak_store: Option<Arc<ObjectStoreSecondary>>,
}

impl StorageManager {
    pub fn new(
        v1: Option<Arc<dyn DaBackend>>,
        v2: Option<Arc<dyn DaBackend>>,
        dispersal_backend: BackendVersion,
        secondary: SecondaryManager,
    ) -> Result<Self> {
        for (slot, backend) in [(BackendVersion::V1, &v1), (BackendVersion::V2, &v2)] {
            if let Some(backend) = backend {
                if backend.version() != slot {
                    return Err(ProxyError::Config(format!(
                        "backend {} serves {} but was registered as {}",
                        backend.name(),
                        backend.version(),
                        slot
                    )));
                }
            }
        }

        let manager = Self {
            v1,
            v2,
            dispersal: AtomicU8::new(encode_version(dispersal_backend)),
            secondary,
            keccak_store: None,
        };
        if manager.backend(dispersal_backend).is_none() {
            return Err(ProxyError::Config(format!(
                "dispersal backend {} is not enabled",
                dispersal_backend
            )));
        }

        Ok(manager)
    }

    pub fn backend(&self, version: BackendVersion) -> Option<&Arc<dyn DaBackend>> {
        match version {
            BackendVersion::V1 => self.v1.as_ref(),
            BackendVersion::V2 => self.v2.as_ref(),
        }
    }

    pub fn dispersal_backend(&self) -> BackendVersion {
        decode_version(self.dispersal.load(Ordering::Acquire))
    }

    /// Switches the backend used for new writes. Reads are unaffected.
    pub fn set_dispersal_backend(&self, version: BackendVersion) -> Result<()> {
        if self.backend(version).is_none() {
            return Err(ProxyError::Config(format!(
                "cannot disperse to {}: backend is not enabled",
                version
            )));
        }

        let previous = self.dispersal.swap(encode_version(version), Ordering::AcqRel);
        tracing::info!(
            "dispersal backend switched from={} to={}",
            decode_version(previous),
            version
        );
        Ok(())
    }

    pub fn secondary(&self) -> &SecondaryManager {
        &self.secondary
    }

    pub fn with_keccak_store(mut self, store: Arc<ObjectStoreSecondary>) -> Self {
        self.keccak_store = Some(store);
        self
    }

    fn keccak_store(&self) -> Result<&ObjectStoreSecondary> {
        self.keccak_store.as_deref().ok_or_else(|| {
            ProxyError::InvalidRequest(
                "keccak commitments require an s3 target, but none is configured".to_string(),
            )
        })
    }

    /// Stores `value` under a caller-supplied keccak commitment. The key must
    /// be the keccak-256 digest of the value.
    pub async fn put_keccak(&self, key: &[u8], value: Bytes) -> Result<()> {
        let store = self.keccak_store()?;
        ObjectStoreSecondary::verify_keccak_pair(key, &value)?;
        store.put(key, value).await?;
        tracing::debug!("stored keccak commitment key={}", hex::encode(key));
        Ok(())
    }

    /// Reads a value stored by [`StorageManager::put_keccak`], re-checking
    /// the digest so a tampered object is never served.
    pub async fn get_keccak(&self, key: &[u8]) -> Result<Bytes> {
        let store = self.keccak_store()?;
        let value = store.get(key).await?;
        ObjectStoreSecondary::verify_keccak_pair(key, &value)?;
        Ok(value)
    }

    pub async fn put(&self, payload: Bytes) -> Result<VersionedCert> {
        let version = self.dispersal_backend();
        let backend = self
            .backend(version)
            .ok_or_else(|| ProxyError::Internal(format!("dispersal backend {} missing", version)))?;

        let cert = backend.put(payload.clone()).await?;
        tracing::debug!(
            "dispersed payload backend={} size={} key={}",
            backend.name(),
            payload.len(),
            cert.blob_key()
        );

        self.secondary
            .handle_write(cert.blob_key().as_bytes(), payload)
            .await?;
        Ok(cert)
    }

    /// Resolves `commitment` (version byte followed by the serialized cert)
    /// to its payload.
    pub async fn get(&self, commitment: &[u8]) -> Result<Bytes> {
        let cert = VersionedCert::from_commitment(commitment)?;
        let version = cert.version.backend();
        let backend = self.backend(version).ok_or_else(|| {
            ProxyError::InvalidRequest(format!("no backend enabled for {} certificates", version))
        })?;

        backend.verify_cert(&cert)?;

        let key = cert.blob_key();
        let verify = |payload: &[u8]| backend.verify_payload(&cert, payload);

        if self.secondary.caching_enabled() {
            match self
                .secondary
                .multi_source_read(key.as_bytes(), false, &verify)
                .await
            {
                Ok(payload) => return Ok(payload),
                Err(error) => {
                    tracing::debug!("cache miss key={} error={}", key, error);
                }
            }
        }

        let primary_error = match backend.get(&cert).await {
            Ok(payload) => {
                self.backfill(&key.0, &payload).await;
                return Ok(payload);
            }
            Err(error) => error,
        };

        if !self.secondary.fallback_enabled() || !is_fallback_eligible(&primary_error) {
            return Err(primary_error);
        }

        tracing::warn!(
            "primary read failed, trying fallback targets backend={} key={} error={}",
            backend.name(),
            key,
            primary_error
        );
        match self
            .secondary
            .multi_source_read(key.as_bytes(), true, &verify)
            .await
        {
            Ok(payload) => {
                self.backfill(&key.0, &payload).await;
                Ok(payload)
            }
            Err(fallback_error) if primary_error.is_not_found() && fallback_error.is_not_found() => {
                Err(primary_error)
            }
            Err(fallback_error) => Err(ProxyError::Unavailable(format!(
                "primary: {}; fallback: {}",
                primary_error, fallback_error
            ))),
        }
    }

    async fn backfill(&self, key: &[u8], payload: &Bytes) {
        if !self.secondary.caching_enabled() || !self.secondary.write_on_cache_miss() {
            return;
        }
        if let Err(error) = self.secondary.handle_write(key, payload.clone()).await {
            tracing::warn!(
                "cache backfill failed key={} error={}",
                hex::encode(key),
                error
            );
        }
    }
}

/// Injected derivation faults and cert failures are answers, not outages.
fn is_fallback_eligible(error: &ProxyError) -> bool {
    !matches!(error, ProxyError::Derivation(_)) && !error.is_fatal_cert_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemstoreConfig, SafeConfig, VerifierConfig};
    use crate::ephemeral::EphemeralStore;
    use crate::error::VerificationError;
    use crate::store::{MemstoreV1, MemstoreV2};
    use crate::verify::{DigestCommitter, Verifier};
    use object_store::memory::InMemory;
    use object_store::{ObjectStore, PutPayload};

    fn backends() -> (Arc<dyn DaBackend>, Arc<dyn DaBackend>) {
        let prover = Arc::new(DigestCommitter::new(1 << 16));
        let verifier = Arc::new(
            Verifier::new(VerifierConfig::default(), prover.clone(), None).unwrap(),
        );
        let store = EphemeralStore::new(SafeConfig::new(MemstoreConfig::default()));
        (
            Arc::new(MemstoreV1::new(store.clone(), verifier.clone(), prover.clone())),
            Arc::new(MemstoreV2::new(store, verifier, prover)),
        )
    }

    fn no_secondary() -> SecondaryManager {
        SecondaryManager::new(vec![], vec![], false, false)
    }

    #[test]
    fn test_dispersal_backend_must_be_enabled() {
        let (v1, _) = backends();
        let err = StorageManager::new(Some(v1), None, BackendVersion::V2, no_secondary()).err();
        assert!(matches!(err, Some(ProxyError::Config(_))));
    }

    #[test]
    fn test_backend_registered_in_wrong_slot() {
        let (v1, _) = backends();
        let err = StorageManager::new(None, Some(v1), BackendVersion::V2, no_secondary()).err();
        assert!(matches!(err, Some(ProxyError::Config(_))));
    }

    #[tokio::test]
    async fn test_reads_follow_cert_version_not_dispersal() {
        let (v1, v2) = backends();
        let manager =
            StorageManager::new(Some(v1), Some(v2), BackendVersion::V1, no_secondary()).unwrap();

        let legacy = manager.put(Bytes::from_static(b"legacy")).await.unwrap();
        manager.set_dispersal_backend(BackendVersion::V2).unwrap();
        assert_eq!(manager.dispersal_backend(), BackendVersion::V2);
        let current = manager.put(Bytes::from_static(b"current")).await.unwrap();

        assert_eq!(
            manager.get(&legacy.to_commitment()).await.unwrap(),
            Bytes::from_static(b"legacy")
        );
        assert_eq!(
            manager.get(&current.to_commitment()).await.unwrap(),
            Bytes::from_static(b"current")
        );
    }

    fn keccak_manager() -> (StorageManager, Arc<dyn ObjectStore>) {
        let (v1, _) = backends();
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let manager = StorageManager::new(Some(v1), None, BackendVersion::V1, no_secondary())
            .unwrap()
            .with_keccak_store(Arc::new(ObjectStoreSecondary::new(objects.clone(), "")));
        (manager, objects)
    }

    #[tokio::test]
    async fn test_keccak_commitment_round_trip() {
        let (manager, _) = keccak_manager();
        let value = Bytes::from_static(b"op keccak preimage");
        let key = crate::hash::keccak256(&value);

        manager.put_keccak(&key, value.clone()).await.unwrap();
        assert_eq!(manager.get_keccak(&key).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_keccak_commitment_mismatch() {
        let (manager, objects) = keccak_manager();
        let value = Bytes::from_static(b"preimage");
        let key = crate::hash::keccak256(&value);

        let err = manager
            .put_keccak(&key, Bytes::from_static(b"different"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Verification(VerificationError::KeccakKeyMismatch { .. })
        ));
        assert!(manager.get_keccak(&key).await.unwrap_err().is_not_found());

        // Object replaced behind the proxy's back.
        let path = object_store::path::Path::from(hex::encode(key));
        objects
            .put(&path, PutPayload::from(Bytes::from_static(b"tampered")))
            .await
            .unwrap();
        let err = manager.get_keccak(&key).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Verification(VerificationError::KeccakKeyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_keccak_commitment_requires_s3() {
        let (v1, _) = backends();
        let manager =
            StorageManager::new(Some(v1), None, BackendVersion::V1, no_secondary()).unwrap();
        let value = Bytes::from_static(b"x");
        let key = crate::hash::keccak256(&value);

        let err = manager.put_keccak(&key, value).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
        let err = manager.get_keccak(&key).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_backend_for_cert_version() {
        let (v1, v2) = backends();
        let writer =
            StorageManager::new(Some(v1), None, BackendVersion::V1, no_secondary()).unwrap();
        let reader =
            StorageManager::new(None, Some(v2), BackendVersion::V2, no_secondary()).unwrap();

        let cert = writer.put(Bytes::from_static(b"x")).await.unwrap();
        let err = reader.get(&cert.to_commitment()).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
        assert!(reader.set_dispersal_backend(BackendVersion::V1).is_err());
    }
}
