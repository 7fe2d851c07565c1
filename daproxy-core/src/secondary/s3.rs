use super::SecondaryStore;
use crate::config::{S3Config, SecondaryBackend};
use crate::error::{ProxyError, Result, VerificationError};
use crate::hash::keccak256;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Secondary target backed by any `object_store` implementation. Objects
/// are keyed by the hex form of the storage key under an optional prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreSecondary {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreSecondary {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &S3Config) -> Result<Self> {
        let bucket = config.bucket.trim();
        if bucket.is_empty() {
            return Err(ProxyError::Config(
                "s3 bucket is required for s3 secondary".to_string(),
            ));
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = config.region.as_deref() {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = config.endpoint.as_deref() {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let Some(access_key_id) = config.access_key_id.as_deref() {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = config.secret_access_key.as_deref() {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let store = builder.build().map_err(|error| {
            ProxyError::Config(format!("failed to build s3 client: {}", error))
        })?;

        Ok(Self::new(
            Arc::new(store),
            config.path.clone().unwrap_or_default(),
        ))
    }

    /// Checks that `key` is the keccak-256 digest of `value`, as required
    /// for keccak commitments.
    pub fn verify_keccak_pair(
        key: &[u8],
        value: &[u8],
    ) -> std::result::Result<(), VerificationError> {
        let computed = keccak256(value);
        if key == computed.as_slice() {
            Ok(())
        } else {
            Err(VerificationError::KeccakKeyMismatch {
                key: hex::encode(key),
                computed: hex::encode(computed),
            })
        }
    }

    fn object_path(&self, key: &[u8]) -> Path {
        let name = hex::encode(key);
        if self.prefix.is_empty() {
            Path::from(name)
        } else {
            Path::from(format!("{}/{}", self.prefix, name))
        }
    }
}

#[async_trait]
impl SecondaryStore for ObjectStoreSecondary {
    fn backend_type(&self) -> SecondaryBackend {
        SecondaryBackend::S3
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let path = self.object_path(key);
        self.store.put(&path, PutPayload::from(value)).await?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        let path = self.object_path(key);
        match self.store.get(&path).await {
            Ok(object) => Ok(object.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {
                Err(ProxyError::NotFound(path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}
