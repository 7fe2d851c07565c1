use daproxy_core::{CertVerifierSnapshot, ProxyError, Result, StoreConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    pub store: StoreConfig,
    /// Onchain quorum parameters. Required when `store.verifier.verify_certs` is set.
    #[serde(default)]
    pub verifier_snapshot: Option<CertVerifierSnapshot>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3100".to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("DAPROXY").separator("__"))
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(ProxyError::Config("listen_addr cannot be empty".to_string()));
        }
        if self.max_body_bytes == 0 {
            return Err(ProxyError::Config(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.store.verifier.verify_certs && self.verifier_snapshot.is_none() {
            return Err(ProxyError::Config(
                "verifier_snapshot is required when verify_certs is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daproxy_core::{BackendVersion, SecondaryBackend};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
listen_addr: "127.0.0.1:4242"
store:
  backends_to_enable: ["v1", "v2"]
  dispersal_backend: "v2"
  memstore_enabled: true
  memstore:
    blob_expiration: "10m"
    put_latency: "50ms"
  cache_targets: ["memory"]
  async_put_workers: 0
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4242");
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.store.dispersal_backend, BackendVersion::V2);
        assert_eq!(config.store.cache_targets, vec![SecondaryBackend::Memory]);
        assert_eq!(config.store.memstore.blob_expiration, Duration::from_secs(600));
        assert_eq!(config.store.memstore.put_latency, Duration::from_millis(50));
        assert_eq!(config.store.async_put_workers, 0);
    }

    #[test]
    fn test_load_verifier_snapshot() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
store:
  backends_to_enable: ["v1"]
  dispersal_backend: "v1"
  memstore_enabled: true
  verifier:
    verify_certs: true
    network: "holesky"
verifier_snapshot:
  quorum_adversary_thresholds:
    "0": 33
    "1": 33
  quorums_required: [0, 1]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        let snapshot = config.verifier_snapshot.unwrap();
        assert_eq!(snapshot.quorum_adversary_thresholds.get(&1), Some(&33));
        assert_eq!(snapshot.quorums_required, vec![0, 1]);
    }

    #[test]
    fn test_verify_certs_requires_snapshot() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
store:
  backends_to_enable: ["v1"]
  dispersal_backend: "v1"
  memstore_enabled: true
  verifier:
    verify_certs: true
"#
        )
        .unwrap();

        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }
}
