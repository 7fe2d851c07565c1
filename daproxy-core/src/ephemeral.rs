//! In-memory, TTL-bounded blob store.
//!
//! Backs the memstore primaries and the `memory` secondary target. Entries
//! are immutable once written. Fault injection (latency, failover, derivation
//! errors) is driven by a shared [`SafeConfig`] so it can be flipped at
//! runtime through the admin endpoint.

use crate::config::{SafeConfig, SecondaryBackend};
use crate::error::{DerivationError, ProxyError, Result};
use crate::secondary::SecondaryStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum StoredValue {
    Payload(Bytes),
    Derivation(DerivationError),
}

#[derive(Debug, Clone)]
struct EphemeralEntry {
    value: StoredValue,
    inserted_at: Instant,
}

#[derive(Debug, Clone)]
pub struct EphemeralStore {
    entries: Arc<RwLock<HashMap<Vec<u8>, EphemeralEntry>>>,
    config: SafeConfig,
}

impl EphemeralStore {
    pub fn new(config: SafeConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &SafeConfig {
        &self.config
    }

    pub async fn insert_entry(&self, key: &[u8], value: Bytes) -> Result<()> {
        let put_latency = self.config.put_latency();

        if self.config.put_returns_failover_error() {
            tokio::time::sleep(put_latency).await;
            return Err(ProxyError::Failover(
                "ephemeral store configured to return failover error".to_string(),
            ));
        }

        let max = self.config.max_blob_size_bytes();
        if value.len() > max {
            return Err(ProxyError::PayloadTooLarge {
                size: value.len(),
                max,
            });
        }

        tokio::time::sleep(put_latency).await;

        let injected = self.config.put_with_get_returns_derivation_error();
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(ProxyError::AlreadyExists(hex::encode(key)));
        }

        let value = match injected {
            Some(error) => StoredValue::Derivation(error),
            None => StoredValue::Payload(value),
        };
        entries.insert(
            key.to_vec(),
            EphemeralEntry {
                value,
                inserted_at: Instant::now(),
            },
        );

        Ok(())
    }

    pub async fn fetch_entry(&self, key: &[u8]) -> Result<Bytes> {
        tokio::time::sleep(self.config.get_latency()).await;

        let entries = self.entries.read().await;
        let entry = entries
            .get(key)
            .ok_or_else(|| ProxyError::NotFound(hex::encode(key)))?;

        match &entry.value {
            StoredValue::Payload(payload) => Ok(payload.clone()),
            StoredValue::Derivation(error) => Err(ProxyError::Derivation(error.clone())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry older than the configured expiration. Returns the
    /// number removed; a zero expiration removes nothing.
    pub async fn prune_expired(&self) -> usize {
        let expiration = self.config.blob_expiration();
        if expiration.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= expiration);
        before - entries.len()
    }

    pub fn start_expiration_sweep(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("ephemeral expiration sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.prune_expired().await;
                        if removed > 0 {
                            tracing::debug!("pruned expired ephemeral entries count={}", removed);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SecondaryStore for EphemeralStore {
    fn backend_type(&self) -> SecondaryBackend {
        SecondaryBackend::Memory
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        // Keys are content derived, so a duplicate carries the same bytes.
        match self.insert_entry(key, value).await {
            Err(ProxyError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.fetch_entry(key).await
    }
}
