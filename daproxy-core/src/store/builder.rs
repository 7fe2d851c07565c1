use super::{DaBackend, DisperserClient, MemstoreV1, MemstoreV2, NetworkV1Store, StorageManager};
use crate::config::{
    BackendVersion, MemstoreConfig, SafeConfig, SecondaryBackend, StoreConfig,
};
use crate::ephemeral::{DEFAULT_SWEEP_INTERVAL, EphemeralStore};
use crate::error::{ProxyError, Result};
use crate::secondary::{
    ObjectStoreSecondary, RedisSecondary, SecondaryManager, SecondaryStore, SecondaryWorkers,
};
use crate::verify::{CertVerifierSnapshot, CommitmentProver, DigestCommitter, Verifier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks spawned while building: expiration sweeps and
/// secondary write workers. All observe the same cancellation token.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    workers: SecondaryWorkers,
    sweeps: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.workers.join().await;
        for sweep in self.sweeps {
            if let Err(error) = sweep.await {
                tracing::warn!("expiration sweep exited abnormally error={}", error);
            }
        }
    }
}

pub struct BuiltStorage {
    pub manager: Arc<StorageManager>,
    /// Knobs of the primary memstore, present when memstore is enabled.
    pub memstore_config: Option<SafeConfig>,
    pub tasks: BackgroundTasks,
}

#[derive(Clone, Default)]
pub struct StorageManagerBuilder {
    config: Option<StoreConfig>,
    snapshot: Option<CertVerifierSnapshot>,
    prover: Option<Arc<dyn CommitmentProver>>,
    disperser_client: Option<Arc<dyn DisperserClient>>,
    shutdown: Option<CancellationToken>,
    sweep_interval: Option<Duration>,
}

impl StorageManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn verifier_snapshot(mut self, snapshot: CertVerifierSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn commitment_prover(mut self, prover: Arc<dyn CommitmentProver>) -> Self {
        self.prover = Some(prover);
        self
    }

    pub fn disperser_client(mut self, client: Arc<dyn DisperserClient>) -> Self {
        self.disperser_client = Some(client);
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    fn resolve_config(&self) -> Result<&StoreConfig> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ProxyError::Config("store config is required".to_string()))?;

        if config.memstore.max_blob_size_bytes == 0 {
            return Err(ProxyError::Config(
                "memstore max_blob_size_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    fn resolve_backends(&self, config: &StoreConfig) -> Result<Vec<BackendVersion>> {
        let mut enabled = Vec::new();
        for version in &config.backends_to_enable {
            if !enabled.contains(version) {
                enabled.push(*version);
            }
        }

        if enabled.is_empty() {
            return Err(ProxyError::Config(
                "at least one backend must be enabled".to_string(),
            ));
        }
        if !enabled.contains(&config.dispersal_backend) {
            return Err(ProxyError::Config(format!(
                "dispersal backend {} is not in the enabled backends",
                config.dispersal_backend
            )));
        }

        Ok(enabled)
    }

    pub async fn build(&self) -> Result<BuiltStorage> {
        let config = self.resolve_config()?;
        let enabled = self.resolve_backends(config)?;
        let shutdown = self.shutdown.clone().unwrap_or_default();
        let sweep_interval = self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL);

        let prover: Arc<dyn CommitmentProver> = match &self.prover {
            Some(prover) => prover.clone(),
            None => Arc::new(DigestCommitter::new(config.kzg.srs_number_to_load)),
        };
        let verifier = Arc::new(Verifier::new(
            config.verifier.clone(),
            Arc::new(prover.clone()),
            self.snapshot.clone(),
        )?);

        let mut sweeps = Vec::new();
        let memstore_config = SafeConfig::new(config.memstore.clone());
        let mut v1: Option<Arc<dyn DaBackend>> = None;
        let mut v2: Option<Arc<dyn DaBackend>> = None;

        if config.memstore_enabled {
            let store = EphemeralStore::new(memstore_config.clone());
            sweeps.push(store.start_expiration_sweep(sweep_interval, shutdown.clone()));

            for version in &enabled {
                match version {
                    BackendVersion::V1 => {
                        v1 = Some(Arc::new(MemstoreV1::new(
                            store.clone(),
                            verifier.clone(),
                            prover.clone(),
                        )));
                    }
                    BackendVersion::V2 => {
                        v2 = Some(Arc::new(MemstoreV2::new(
                            store.clone(),
                            verifier.clone(),
                            prover.clone(),
                        )));
                    }
                }
            }
        } else {
            for version in &enabled {
                match version {
                    BackendVersion::V1 => {
                        let client = self.disperser_client.clone().ok_or_else(|| {
                            ProxyError::Config(
                                "disperser client is required for the v1 network backend"
                                    .to_string(),
                            )
                        })?;
                        v1 = Some(Arc::new(NetworkV1Store::new(
                            client,
                            verifier.clone(),
                            config.put_retries,
                            config.memstore.max_blob_size_bytes,
                        )));
                    }
                    BackendVersion::V2 => {
                        return Err(ProxyError::Config(
                            "v2 is only available as a memstore backend".to_string(),
                        ));
                    }
                }
            }
        }

        let keccak_store = config
            .s3
            .as_ref()
            .map(ObjectStoreSecondary::from_config)
            .transpose()?
            .map(Arc::new);

        let mut targets: HashMap<SecondaryBackend, Arc<dyn SecondaryStore>> = HashMap::new();
        for backend in config.cache_targets.iter().chain(config.fallback_targets.iter()) {
            if targets.contains_key(backend) {
                continue;
            }
            let target: Arc<dyn SecondaryStore> = match backend {
                SecondaryBackend::Memory => {
                    let store = EphemeralStore::new(SafeConfig::new(MemstoreConfig {
                        max_blob_size_bytes: config.memstore.max_blob_size_bytes,
                        blob_expiration: config.memstore.blob_expiration,
                        ..Default::default()
                    }));
                    sweeps.push(store.start_expiration_sweep(sweep_interval, shutdown.clone()));
                    Arc::new(store)
                }
                SecondaryBackend::S3 => keccak_store.clone().ok_or_else(|| {
                    ProxyError::Config("s3 config is required for the s3 target".to_string())
                })?,
                SecondaryBackend::Redis => {
                    let redis = config.redis.as_ref().ok_or_else(|| {
                        ProxyError::Config(
                            "redis config is required for the redis target".to_string(),
                        )
                    })?;
                    Arc::new(RedisSecondary::connect(redis).await?)
                }
            };
            targets.insert(*backend, target);
        }

        let pick = |backends: &[SecondaryBackend]| -> Vec<Arc<dyn SecondaryStore>> {
            backends
                .iter()
                .filter_map(|backend| targets.get(backend).cloned())
                .collect()
        };
        let mut secondary = SecondaryManager::new(
            pick(&config.cache_targets),
            pick(&config.fallback_targets),
            config.write_on_cache_miss,
            config.error_on_secondary_insert_failure,
        );
        let workers = secondary.start_workers(
            config.async_put_workers,
            config.write_queue_capacity,
            shutdown.clone(),
        );

        let mut manager = StorageManager::new(v1, v2, config.dispersal_backend, secondary)?;
        if let Some(store) = keccak_store {
            manager = manager.with_keccak_store(store);
        }
        tracing::info!(
            "storage manager built dispersal={} enabled={:?} memstore={} caches={:?} fallbacks={:?}",
            config.dispersal_backend,
            enabled,
            config.memstore_enabled,
            config.cache_targets,
            config.fallback_targets
        );

        Ok(BuiltStorage {
            manager: Arc::new(manager),
            memstore_config: config.memstore_enabled.then_some(memstore_config),
            tasks: BackgroundTasks {
                shutdown,
                workers,
                sweeps,
            },
        })
    }
}
