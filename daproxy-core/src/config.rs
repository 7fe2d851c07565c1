//! Configuration types shared by the storage layer and the binary.
//!
//! `SafeConfig` is the hot-updatable knob set read by the ephemeral store on
//! every operation. Everything else is read once at build time.

use crate::error::{DerivationError, ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

pub const DEFAULT_MAX_BLOB_SIZE_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_BLOB_EXPIRATION: Duration = Duration::from_secs(25 * 60);

/// DA protocol version served by a primary backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVersion {
    V1,
    V2,
}

impl std::fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// Networks the verifier knows about. Only used to key historical
/// exemptions; unknown networks get no exemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Holesky,
    Sepolia,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryBackend {
    Memory,
    S3,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemstoreConfig {
    #[serde(default = "default_max_blob_size_bytes")]
    pub max_blob_size_bytes: usize,
    /// Zero keeps entries for the lifetime of the process.
    #[serde(default = "default_blob_expiration", with = "humantime_serde")]
    pub blob_expiration: Duration,
    #[serde(default, with = "humantime_serde")]
    pub put_latency: Duration,
    #[serde(default, with = "humantime_serde")]
    pub get_latency: Duration,
    #[serde(default)]
    pub put_returns_failover_error: bool,
    /// When set, every subsequent insert stores this error instead of the payload.
    #[serde(default)]
    pub put_with_get_returns_derivation_error: Option<DerivationError>,
}

impl Default for MemstoreConfig {
    fn default() -> Self {
        Self {
            max_blob_size_bytes: DEFAULT_MAX_BLOB_SIZE_BYTES,
            blob_expiration: DEFAULT_BLOB_EXPIRATION,
            put_latency: Duration::ZERO,
            get_latency: Duration::ZERO,
            put_returns_failover_error: false,
            put_with_get_returns_derivation_error: None,
        }
    }
}

fn default_max_blob_size_bytes() -> usize {
    DEFAULT_MAX_BLOB_SIZE_BYTES
}

fn default_blob_expiration() -> Duration {
    DEFAULT_BLOB_EXPIRATION
}

/// Partial update accepted by the memstore admin endpoint. Absent fields
/// are left untouched; `put_with_get_returns_derivation_error: null`
/// clears the injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemstoreConfigPatch {
    #[serde(default)]
    pub max_blob_size_bytes: Option<usize>,
    #[serde(default, with = "humantime_serde::option")]
    pub blob_expiration: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub put_latency: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub get_latency: Option<Duration>,
    #[serde(default)]
    pub put_returns_failover_error: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub put_with_get_returns_derivation_error: Option<Option<DerivationError>>,
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Lockable handle around [`MemstoreConfig`]. Clones share the same knobs.
#[derive(Debug, Clone, Default)]
pub struct SafeConfig {
    inner: Arc<RwLock<MemstoreConfig>>,
}

impl SafeConfig {
    pub fn new(config: MemstoreConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemstoreConfig> {
        // A poisoned lock only means a writer panicked mid-assignment of
        // plain values; the data is still usable.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> MemstoreConfig {
        self.read().clone()
    }

    pub fn max_blob_size_bytes(&self) -> usize {
        self.read().max_blob_size_bytes
    }

    pub fn blob_expiration(&self) -> Duration {
        self.read().blob_expiration
    }

    pub fn put_latency(&self) -> Duration {
        self.read().put_latency
    }

    pub fn get_latency(&self) -> Duration {
        self.read().get_latency
    }

    pub fn put_returns_failover_error(&self) -> bool {
        self.read().put_returns_failover_error
    }

    pub fn put_with_get_returns_derivation_error(&self) -> Option<DerivationError> {
        self.read().put_with_get_returns_derivation_error.clone()
    }

    pub fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut MemstoreConfig),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut guard);
    }

    pub fn set_put_returns_failover_error(&self, enabled: bool) {
        self.update(|config| config.put_returns_failover_error = enabled);
    }

    pub fn set_put_with_get_returns_derivation_error(&self, error: Option<DerivationError>) {
        self.update(|config| config.put_with_get_returns_derivation_error = error);
    }

    pub fn apply_patch(&self, patch: MemstoreConfigPatch) -> Result<MemstoreConfig> {
        if patch.max_blob_size_bytes == Some(0) {
            return Err(ProxyError::Config(
                "max_blob_size_bytes must be greater than zero".to_string(),
            ));
        }

        self.update(|config| {
            if let Some(value) = patch.max_blob_size_bytes {
                config.max_blob_size_bytes = value;
            }
            if let Some(value) = patch.blob_expiration {
                config.blob_expiration = value;
            }
            if let Some(value) = patch.put_latency {
                config.put_latency = value;
            }
            if let Some(value) = patch.get_latency {
                config.get_latency = value;
            }
            if let Some(value) = patch.put_returns_failover_error {
                config.put_returns_failover_error = value;
            }
            if let Some(value) = patch.put_with_get_returns_derivation_error {
                config.put_with_get_returns_derivation_error = value;
            }
        });

        Ok(self.snapshot())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KzgConfig {
    /// Number of G1 SRS points loaded into memory. Bounds the largest blob
    /// whose commitment can be verified.
    #[serde(default = "default_srs_number_to_load")]
    pub srs_number_to_load: usize,
}

impl Default for KzgConfig {
    fn default() -> Self {
        Self {
            srs_number_to_load: default_srs_number_to_load(),
        }
    }
}

fn default_srs_number_to_load() -> usize {
    DEFAULT_MAX_BLOB_SIZE_BYTES / 32
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Run batch, inclusion and quorum checks in addition to the commitment check.
    #[serde(default)]
    pub verify_certs: bool,
    #[serde(default)]
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Zero disables key expiry.
    #[serde(default, with = "humantime_serde")]
    pub eviction: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backends_to_enable: Vec<BackendVersion>,
    pub dispersal_backend: BackendVersion,
    #[serde(default)]
    pub memstore_enabled: bool,
    #[serde(default)]
    pub memstore: MemstoreConfig,
    #[serde(default)]
    pub cache_targets: Vec<SecondaryBackend>,
    #[serde(default)]
    pub fallback_targets: Vec<SecondaryBackend>,
    #[serde(default)]
    pub write_on_cache_miss: bool,
    #[serde(default)]
    pub error_on_secondary_insert_failure: bool,
    #[serde(default = "default_async_put_workers")]
    pub async_put_workers: usize,
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// Dispersal attempts made by the network-backed V1 store before giving up.
    #[serde(default = "default_put_retries")]
    pub put_retries: usize,
    #[serde(default)]
    pub kzg: KzgConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backends_to_enable: vec![BackendVersion::V2],
            dispersal_backend: BackendVersion::V2,
            memstore_enabled: true,
            memstore: MemstoreConfig::default(),
            cache_targets: Vec::new(),
            fallback_targets: Vec::new(),
            write_on_cache_miss: false,
            error_on_secondary_insert_failure: false,
            async_put_workers: default_async_put_workers(),
            write_queue_capacity: default_write_queue_capacity(),
            put_retries: default_put_retries(),
            kzg: KzgConfig::default(),
            verifier: VerifierConfig::default(),
            s3: None,
            redis: None,
        }
    }
}

fn default_async_put_workers() -> usize {
    1
}

fn default_write_queue_capacity() -> usize {
    1024
}

fn default_put_retries() -> usize {
    3
}

pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => {
                    serializer.serialize_some(&humantime::format_duration(*duration).to_string())
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let value = Option::<String>::deserialize(deserializer)?;
            value
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_updates_only_present_fields() {
        let config = SafeConfig::new(MemstoreConfig::default());
        let patch: MemstoreConfigPatch =
            serde_json::from_str(r#"{"put_latency": "250ms", "put_returns_failover_error": true}"#)
                .unwrap();

        let updated = config.apply_patch(patch).unwrap();
        assert_eq!(updated.put_latency, Duration::from_millis(250));
        assert!(updated.put_returns_failover_error);
        assert_eq!(updated.get_latency, Duration::ZERO);
        assert_eq!(updated.blob_expiration, DEFAULT_BLOB_EXPIRATION);
    }

    #[test]
    fn test_patch_null_clears_derivation_error() {
        let config = SafeConfig::new(MemstoreConfig::default());
        config.set_put_with_get_returns_derivation_error(Some(DerivationError {
            status_code: 3,
            msg: "bad rlp".to_string(),
        }));

        let patch: MemstoreConfigPatch =
            serde_json::from_str(r#"{"put_with_get_returns_derivation_error": null}"#).unwrap();
        config.apply_patch(patch).unwrap();
        assert!(config.put_with_get_returns_derivation_error().is_none());

        let untouched: MemstoreConfigPatch = serde_json::from_str("{}").unwrap();
        assert!(untouched.put_with_get_returns_derivation_error.is_none());
    }

    #[test]
    fn test_patch_rejects_zero_max_size() {
        let config = SafeConfig::new(MemstoreConfig::default());
        let patch = MemstoreConfigPatch {
            max_blob_size_bytes: Some(0),
            ..Default::default()
        };
        assert!(config.apply_patch(patch).is_err());
        assert_eq!(config.max_blob_size_bytes(), DEFAULT_MAX_BLOB_SIZE_BYTES);
    }

    #[test]
    fn test_clones_share_knobs() {
        let config = SafeConfig::new(MemstoreConfig::default());
        let handle = config.clone();
        handle.update(|config| config.get_latency = Duration::from_secs(1));
        assert_eq!(config.get_latency(), Duration::from_secs(1));
    }

    #[test]
    fn test_memstore_config_round_trips_humantime() {
        let json = serde_json::to_value(MemstoreConfig::default()).unwrap();
        assert_eq!(json["blob_expiration"], "25m");
        assert_eq!(json["put_latency"], "0s");
    }
}
