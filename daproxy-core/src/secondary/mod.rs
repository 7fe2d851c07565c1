//! Cache and fallback tiers behind the primary DA backend.
//!
//! Writes fan out to every configured target, either inline or through a
//! bounded queue drained by a fixed pool of workers. Reads walk one tier in
//! configured order and stop at the first hit that passes verification.

pub mod redis;
pub mod s3;

pub use self::redis::RedisSecondary;
pub use self::s3::ObjectStoreSecondary;

use crate::config::SecondaryBackend;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait SecondaryStore: Send + Sync {
    fn backend_type(&self) -> SecondaryBackend;

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    async fn get(&self, key: &[u8]) -> Result<Bytes>;
}

/// Verification applied to every value read back from a secondary target.
pub type ReadVerifier<'a> = &'a (dyn Fn(&[u8]) -> Result<()> + Send + Sync);

#[derive(Debug, Clone)]
pub struct WriteJob {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Default)]
pub struct SecondaryStats {
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
    jobs_dropped: AtomicU64,
    reads_hit: AtomicU64,
    reads_missed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SecondaryStatsSnapshot {
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub jobs_dropped: u64,
    pub reads_hit: u64,
    pub reads_missed: u64,
}

impl SecondaryStats {
    pub fn snapshot(&self) -> SecondaryStatsSnapshot {
        SecondaryStatsSnapshot {
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            reads_hit: self.reads_hit.load(Ordering::Relaxed),
            reads_missed: self.reads_missed.load(Ordering::Relaxed),
        }
    }
}

/// Handles of the write-through workers. Dropping it detaches them; use
/// [`SecondaryWorkers::join`] after cancelling to wait for a clean exit.
#[derive(Debug, Default)]
pub struct SecondaryWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl SecondaryWorkers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn join(self) {
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::warn!("secondary write worker exited abnormally error={}", error);
            }
        }
    }
}

pub struct SecondaryManager {
    caches: Vec<Arc<dyn SecondaryStore>>,
    fallbacks: Vec<Arc<dyn SecondaryStore>>,
    /// Cache and fallback targets with shared instances listed once.
    write_targets: Arc<[Arc<dyn SecondaryStore>]>,
    write_on_cache_miss: bool,
    error_on_insert_failure: bool,
    queue: Option<mpsc::Sender<WriteJob>>,
    stats: Arc<SecondaryStats>,
}

impl SecondaryManager {
    pub fn new(
        caches: Vec<Arc<dyn SecondaryStore>>,
        fallbacks: Vec<Arc<dyn SecondaryStore>>,
        write_on_cache_miss: bool,
        error_on_insert_failure: bool,
    ) -> Self {
        let mut write_targets: Vec<Arc<dyn SecondaryStore>> = Vec::new();
        for target in caches.iter().chain(fallbacks.iter()) {
            if !write_targets.iter().any(|seen| Arc::ptr_eq(seen, target)) {
                write_targets.push(target.clone());
            }
        }

        Self {
            caches,
            fallbacks,
            write_targets: write_targets.into(),
            write_on_cache_miss,
            error_on_insert_failure,
            queue: None,
            stats: Arc::new(SecondaryStats::default()),
        }
    }

    /// Spawns `count` workers draining a queue of `capacity` jobs. Nothing is
    /// spawned when no target is configured or `count` is zero; writes then
    /// happen inline.
    pub fn start_workers(
        &mut self,
        count: usize,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> SecondaryWorkers {
        if !self.enabled() || count == 0 {
            return SecondaryWorkers::default();
        }

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    self.write_targets.clone(),
                    self.stats.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        self.queue = Some(sender);
        tracing::info!(
            "started secondary write workers count={} capacity={}",
            count,
            capacity
        );
        SecondaryWorkers { handles }
    }

    pub fn enabled(&self) -> bool {
        self.caching_enabled() || self.fallback_enabled()
    }

    pub fn caching_enabled(&self) -> bool {
        !self.caches.is_empty()
    }

    pub fn fallback_enabled(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    pub fn write_on_cache_miss(&self) -> bool {
        self.write_on_cache_miss
    }

    pub fn async_writes(&self) -> bool {
        self.queue.is_some()
    }

    pub fn stats(&self) -> SecondaryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Propagates a freshly written blob to every secondary target.
    pub async fn handle_write(&self, key: &[u8], value: Bytes) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let Some(queue) = &self.queue else {
            let result = write_to_targets(&self.write_targets, key, value, &self.stats).await;
            return match result {
                Err(error) if self.error_on_insert_failure => Err(error),
                _ => Ok(()),
            };
        };

        let job = WriteJob {
            key: Bytes::copy_from_slice(key),
            value,
        };
        let reason = match queue.try_send(job) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => "write queue is full",
            Err(mpsc::error::TrySendError::Closed(_)) => "write queue is closed",
        };

        self.stats.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        if self.error_on_insert_failure {
            return Err(ProxyError::SecondaryWrite(reason.to_string()));
        }
        tracing::warn!(
            "dropping secondary write key={} reason={}",
            hex::encode(key),
            reason
        );
        Ok(())
    }

    /// Reads `key` from the fallback tier (`fallback = true`) or the cache
    /// tier, in configured order.
    ///
    /// Returns `NotFound` when every target reported a miss and
    /// `Unavailable` when at least one target failed or returned data that
    /// did not verify.
    pub async fn multi_source_read(
        &self,
        key: &[u8],
        fallback: bool,
        verify: ReadVerifier<'_>,
    ) -> Result<Bytes> {
        let targets = if fallback {
            &self.fallbacks
        } else {
            &self.caches
        };
        let tier = if fallback { "fallback" } else { "cache" };

        let mut all_missed = true;
        for target in targets {
            match target.get(key).await {
                Ok(value) => match verify(&value) {
                    Ok(()) => {
                        self.stats.reads_hit.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(error) => {
                        all_missed = false;
                        tracing::warn!(
                            "secondary value failed verification tier={} backend={:?} error={}",
                            tier,
                            target.backend_type(),
                            error
                        );
                    }
                },
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    all_missed = false;
                    tracing::warn!(
                        "secondary read failed tier={} backend={:?} error={}",
                        tier,
                        target.backend_type(),
                        error
                    );
                }
            }
        }

        self.stats.reads_missed.fetch_add(1, Ordering::Relaxed);
        if all_missed {
            Err(ProxyError::NotFound(format!(
                "{} not found in {} targets",
                hex::encode(key),
                tier
            )))
        } else {
            Err(ProxyError::Unavailable(format!(
                "no {} target could serve {}",
                tier,
                hex::encode(key)
            )))
        }
    }
}

async fn write_to_targets(
    targets: &[Arc<dyn SecondaryStore>],
    key: &[u8],
    value: Bytes,
    stats: &SecondaryStats,
) -> Result<()> {
    let writes = targets.iter().map(|target| {
        let value = value.clone();
        async move { (target.backend_type(), target.put(key, value).await) }
    });

    let mut failures = Vec::new();
    for (backend, result) in join_all(writes).await {
        match result {
            Ok(()) => {
                stats.writes_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                stats.writes_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "secondary write failed backend={:?} key={} error={}",
                    backend,
                    hex::encode(key),
                    error
                );
                failures.push(format!("{:?}: {}", backend, error));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProxyError::SecondaryWrite(failures.join("; ")))
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    targets: Arc<[Arc<dyn SecondaryStore>]>,
    stats: Arc<SecondaryStats>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                drop_pending_jobs(worker_id, &receiver, &stats).await;
                break;
            }
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = job else {
            break;
        };

        // Failures are logged and counted inside; jobs are never retried.
        let _ = write_to_targets(&targets, &job.key, job.value, &stats).await;
    }

    tracing::debug!("secondary write worker stopped worker_id={}", worker_id);
}

/// Closes the queue and counts every job still waiting in it as dropped.
async fn drop_pending_jobs(
    worker_id: usize,
    receiver: &Mutex<mpsc::Receiver<WriteJob>>,
    stats: &SecondaryStats,
) {
    let mut receiver = receiver.lock().await;
    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        stats.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "dropping queued secondary write on shutdown worker_id={} key={}",
            worker_id,
            hex::encode(&job.key)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemstoreConfig, SafeConfig};
    use crate::ephemeral::EphemeralStore;
    use std::sync::atomic::AtomicUsize;

    /// Target whose reads and writes always fail.
    struct Broken {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl SecondaryStore for Broken {
        fn backend_type(&self) -> SecondaryBackend {
            SecondaryBackend::Redis
        }

        async fn put(&self, _key: &[u8], _value: Bytes) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(ProxyError::Internal("connection refused".to_string()))
        }

        async fn get(&self, _key: &[u8]) -> Result<Bytes> {
            Err(ProxyError::Internal("connection refused".to_string()))
        }
    }

    fn memory() -> Arc<EphemeralStore> {
        Arc::new(EphemeralStore::new(SafeConfig::new(MemstoreConfig {
            blob_expiration: std::time::Duration::ZERO,
            ..Default::default()
        })))
    }

    fn accept_all(_: &[u8]) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_disabled_without_targets() {
        let mut manager = SecondaryManager::new(vec![], vec![], false, false);
        assert!(!manager.enabled());
        let workers = manager.start_workers(4, 16, CancellationToken::new());
        assert!(workers.is_empty());
        assert!(!manager.async_writes());
    }

    #[tokio::test]
    async fn test_sync_write_reaches_cache_and_fallback() {
        let cache = memory();
        let fallback = memory();
        let manager = SecondaryManager::new(vec![cache.clone()], vec![fallback.clone()], false, true);

        manager
            .handle_write(b"key", Bytes::from_static(b"value"))
            .await
            .unwrap();
        assert_eq!(cache.fetch_entry(b"key").await.unwrap(), Bytes::from_static(b"value"));
        assert_eq!(fallback.fetch_entry(b"key").await.unwrap(), Bytes::from_static(b"value"));
        assert_eq!(manager.stats().writes_succeeded, 2);
    }

    #[tokio::test]
    async fn test_shared_target_written_once() {
        let shared = memory();
        let manager = SecondaryManager::new(vec![shared.clone()], vec![shared.clone()], false, true);
        manager
            .handle_write(b"key", Bytes::from_static(b"value"))
            .await
            .unwrap();
        assert_eq!(manager.stats().writes_succeeded, 1);
    }

    #[tokio::test]
    async fn test_sync_failure_policy() {
        let broken = Arc::new(Broken {
            writes: AtomicUsize::new(0),
        });

        let fail_open = SecondaryManager::new(vec![broken.clone()], vec![], false, false);
        fail_open
            .handle_write(b"key", Bytes::from_static(b"v"))
            .await
            .unwrap();

        let fail_closed = SecondaryManager::new(vec![broken.clone()], vec![], false, true);
        let err = fail_closed
            .handle_write(b"key", Bytes::from_static(b"v"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::SecondaryWrite(_)));
        assert_eq!(broken.writes.load(Ordering::SeqCst), 2);
        assert_eq!(fail_closed.stats().writes_failed, 1);
    }

    #[tokio::test]
    async fn test_async_workers_drain_queue() {
        let cache = memory();
        let mut manager = SecondaryManager::new(vec![cache.clone()], vec![], false, false);
        let shutdown = CancellationToken::new();
        let workers = manager.start_workers(2, 8, shutdown.clone());
        assert_eq!(workers.len(), 2);

        for i in 0..5u8 {
            manager.handle_write(&[i], Bytes::from(vec![i; 4])).await.unwrap();
        }

        for _ in 0..100 {
            if cache.len().await == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len().await, 5);
        assert_eq!(cache.fetch_entry(&[3]).await.unwrap(), Bytes::from(vec![3u8; 4]));

        shutdown.cancel();
        workers.join().await;
    }

    #[tokio::test]
    async fn test_full_queue_policy() {
        // Enqueueing never yields, so on the single-threaded test runtime the
        // worker cannot take the first job before the second send.
        let cache = memory();
        let shutdown = CancellationToken::new();

        let mut fail_open = SecondaryManager::new(vec![cache.clone()], vec![], false, false);
        let open_workers = fail_open.start_workers(1, 1, shutdown.clone());
        fail_open.handle_write(b"a", Bytes::from_static(b"1")).await.unwrap();
        fail_open.handle_write(b"b", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(fail_open.stats().jobs_dropped, 1);

        let mut fail_closed = SecondaryManager::new(vec![cache], vec![], false, true);
        let closed_workers = fail_closed.start_workers(1, 1, shutdown.clone());
        fail_closed.handle_write(b"c", Bytes::from_static(b"1")).await.unwrap();
        let err = fail_closed
            .handle_write(b"d", Bytes::from_static(b"2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::SecondaryWrite(_)));

        shutdown.cancel();
        open_workers.join().await;
        closed_workers.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_accounts_for_queued_jobs() {
        // The worker is first polled after cancellation, so every queued job
        // is still waiting when it observes shutdown.
        let cache = memory();
        let mut manager = SecondaryManager::new(vec![cache.clone()], vec![], false, false);
        let shutdown = CancellationToken::new();
        let workers = manager.start_workers(1, 16, shutdown.clone());

        for i in 0..5u8 {
            manager.handle_write(&[i], Bytes::from(vec![i; 4])).await.unwrap();
        }
        shutdown.cancel();
        workers.join().await;

        let stats = manager.stats();
        assert_eq!(stats.writes_succeeded + stats.writes_failed + stats.jobs_dropped, 5);
        assert_eq!(stats.jobs_dropped, 5);
        assert_eq!(cache.len().await, 0);

        // The queue is closed, so later writes are dropped rather than lost.
        manager.handle_write(b"late", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(manager.stats().jobs_dropped, 6);
    }

    #[tokio::test]
    async fn test_fallback_read_order_and_verification() {
        let first = memory();
        let second = memory();
        first.insert_entry(b"key", Bytes::from_static(b"bad")).await.unwrap();
        second.insert_entry(b"key", Bytes::from_static(b"good")).await.unwrap();

        let manager = SecondaryManager::new(vec![], vec![first, second], false, false);
        let only_good = |value: &[u8]| {
            if value == b"good" {
                Ok(())
            } else {
                Err(ProxyError::Internal("rejected".to_string()))
            }
        };

        let value = manager.multi_source_read(b"key", true, &only_good).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"good"));
        assert_eq!(manager.stats().reads_hit, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unavailable_not_not_found() {
        let broken: Arc<dyn SecondaryStore> = Arc::new(Broken {
            writes: AtomicUsize::new(0),
        });
        let manager = SecondaryManager::new(vec![], vec![memory(), broken], false, false);
        let err = manager
            .multi_source_read(b"key", true, &accept_all)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unavailable(_)));

        let manager = SecondaryManager::new(vec![], vec![memory()], false, false);
        let err = manager
            .multi_source_read(b"key", true, &accept_all)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
