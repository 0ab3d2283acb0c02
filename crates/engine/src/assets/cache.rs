use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::key::AssetKey;

static CACHE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_cache_lock_poison_once(operation: &'static str) {
    if CACHE_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "asset cache lock poisoned; recovered inner value");
    }
}

/// Decoded asset payload. The concrete type is defined by whichever loader
/// produced it; `size_bytes` feeds the eviction budget.
pub struct AssetData {
    payload: Box<dyn Any + Send + Sync>,
    size_bytes: usize,
}

impl AssetData {
    pub fn new<T: Any + Send + Sync>(payload: T, size_bytes: usize) -> Self {
        Self {
            payload: Box::new(payload),
            size_bytes,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

impl std::fmt::Debug for AssetData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetData")
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to read asset file {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to decode asset {key}: {message}")]
    Decode { key: String, message: String },
    #[error("asset loader pool is shut down")]
    PoolShutDown,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot invalidate {key}: {refcount} handle(s) still live")]
    InvalidateInUse { key: String, refcount: u32 },
    #[error("unknown asset key {key}")]
    UnknownKey { key: String },
    #[error("failed to spawn asset loader worker: {0}")]
    SpawnWorker(#[source] std::io::Error),
}

/// Load capability supplied per `acquire`; runs once on a background worker.
pub type AssetLoader = Box<dyn FnOnce(&AssetKey) -> Result<AssetData, LoadError> + Send + 'static>;

/// Loader that reads the key's path under `root` into raw bytes.
pub fn file_bytes_loader(root: &Path) -> AssetLoader {
    let root = root.to_path_buf();
    Box::new(move |key: &AssetKey| {
        let path = root.join(key.path());
        let bytes = fs::read(&path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            message: source.to_string(),
        })?;
        let size = bytes.len();
        Ok(AssetData::new(bytes, size))
    })
}

#[derive(Debug, Clone)]
pub enum AssetStatus {
    Pending,
    Ready(Arc<AssetData>),
    Failed(LoadError),
}

impl AssetStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, AssetStatus::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, AssetStatus::Ready(_))
    }
}

/// Reference to a cache entry. Not cloneable: every handle comes from one
/// `acquire` and must be returned through exactly one `release`.
#[derive(Debug)]
pub struct AssetHandle {
    key: AssetKey,
    epoch: u64,
}

impl AssetHandle {
    pub fn key(&self) -> &AssetKey {
        &self.key
    }
}

#[derive(Debug)]
enum EntryState {
    Pending,
    Ready(Arc<AssetData>),
    Failed(LoadError),
}

#[derive(Debug)]
struct Entry {
    epoch: u64,
    refcount: u32,
    state: EntryState,
    /// Set when the refcount reaches zero; orders eviction, oldest first.
    released_serial: Option<u64>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<AssetKey, Entry>,
    next_epoch: u64,
    next_released_serial: u64,
}

struct LoadJob {
    key: AssetKey,
    epoch: u64,
    loader: AssetLoader,
}

/// Deduplicating, reference-counted asset cache with background loading.
///
/// `acquire`, `poll`, `release`, `invalidate`, and `trim` are non-blocking
/// and safe to call from any context; only the worker threads touch disk.
pub struct AssetCache {
    inner: Arc<Mutex<CacheInner>>,
    jobs: Option<Sender<LoadJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl AssetCache {
    pub fn new(worker_threads: usize) -> Result<Self, CacheError> {
        let worker_threads = worker_threads.max(1);
        let inner = Arc::new(Mutex::new(CacheInner::default()));
        let (sender, receiver) = mpsc::channel::<LoadJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_threads);
        for index in 0..worker_threads {
            let worker_inner = Arc::clone(&inner);
            let worker_receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("asset-worker-{index}"))
                .spawn(move || worker_loop(worker_inner, worker_receiver))
                .map_err(CacheError::SpawnWorker)?;
            workers.push(handle);
        }

        info!(worker_threads, "asset_cache_started");
        Ok(Self {
            inner,
            jobs: Some(sender),
            workers,
        })
    }

    /// Returns a handle immediately; the data may still be loading. The first
    /// acquire for a key enqueues `loader`, later acquires share the entry
    /// and their loader argument is dropped unused.
    pub fn acquire(&self, key: AssetKey, loader: AssetLoader) -> AssetHandle {
        let epoch = {
            let mut inner = self.lock_inner();
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.refcount += 1;
                entry.released_serial = None;
                return AssetHandle {
                    epoch: entry.epoch,
                    key,
                };
            }
            let epoch = inner.next_epoch;
            inner.next_epoch += 1;
            inner.entries.insert(
                key.clone(),
                Entry {
                    epoch,
                    refcount: 1,
                    state: EntryState::Pending,
                    released_serial: None,
                },
            );
            epoch
        };

        debug!(key = %key, "asset_load_queued");
        let rejected = match &self.jobs {
            Some(jobs) => jobs
                .send(LoadJob {
                    key: key.clone(),
                    epoch,
                    loader,
                })
                .is_err(),
            None => true,
        };
        if rejected {
            warn!(key = %key, "asset_load_rejected_pool_shut_down");
            let mut inner = self.lock_inner();
            if let Some(entry) = inner.entries.get_mut(&key) {
                if entry.epoch == epoch {
                    entry.state = EntryState::Failed(LoadError::PoolShutDown);
                }
            }
        }

        AssetHandle { key, epoch }
    }

    pub fn poll(&self, handle: &AssetHandle) -> AssetStatus {
        let inner = self.lock_inner();
        match inner.entries.get(&handle.key) {
            Some(entry) if entry.epoch == handle.epoch => match &entry.state {
                EntryState::Pending => AssetStatus::Pending,
                EntryState::Ready(data) => AssetStatus::Ready(Arc::clone(data)),
                EntryState::Failed(error) => AssetStatus::Failed(error.clone()),
            },
            _ => {
                warn!(key = %handle.key, "poll_with_stale_handle");
                AssetStatus::Pending
            }
        }
    }

    /// Drops one reference. A refcount of zero marks the entry evictable but
    /// keeps the data resident until `trim`, so a quick re-acquire is cheap.
    pub fn release(&self, handle: AssetHandle) {
        let mut inner = self.lock_inner();
        let serial = inner.next_released_serial;
        match inner.entries.get_mut(&handle.key) {
            Some(entry) if entry.epoch == handle.epoch => {
                entry.refcount = entry.refcount.saturating_sub(1);
                if entry.refcount == 0 {
                    entry.released_serial = Some(serial);
                    inner.next_released_serial += 1;
                    debug!(key = %handle.key, "asset_evictable");
                }
            }
            _ => warn!(key = %handle.key, "release_with_stale_handle"),
        }
    }

    /// Removes an unreferenced entry so the next `acquire` loads afresh. The
    /// entry's load may still be in flight; its late result is discarded by
    /// epoch mismatch when it lands.
    pub fn invalidate(&self, key: &AssetKey) -> Result<(), CacheError> {
        let mut inner = self.lock_inner();
        let entry = inner.entries.get(key).ok_or_else(|| CacheError::UnknownKey {
            key: key.to_string(),
        })?;
        if entry.refcount > 0 {
            return Err(CacheError::InvalidateInUse {
                key: key.to_string(),
                refcount: entry.refcount,
            });
        }
        inner.entries.remove(key);
        info!(key = %key, "asset_invalidated");
        Ok(())
    }

    /// Evicts unreferenced `Ready` entries, least recently released first,
    /// until resident bytes fit `max_resident_bytes`. Failed entries are kept
    /// so that callers cannot retry without an explicit `invalidate`.
    pub fn trim(&self, max_resident_bytes: usize) -> usize {
        let mut inner = self.lock_inner();

        let mut resident_bytes: usize = inner
            .entries
            .values()
            .filter_map(|entry| match &entry.state {
                EntryState::Ready(data) => Some(data.size_bytes()),
                _ => None,
            })
            .sum();

        let mut evictable: Vec<(AssetKey, u64, usize)> = inner
            .entries
            .iter()
            .filter_map(|(key, entry)| match (&entry.state, entry.released_serial) {
                (EntryState::Ready(data), Some(serial)) => {
                    Some((key.clone(), serial, data.size_bytes()))
                }
                _ => None,
            })
            .collect();
        evictable.sort_by_key(|(_, serial, _)| *serial);

        let mut evicted = 0usize;
        for (key, _, size) in evictable {
            if resident_bytes <= max_resident_bytes {
                break;
            }
            inner.entries.remove(&key);
            resident_bytes = resident_bytes.saturating_sub(size);
            evicted += 1;
        }

        if evicted > 0 {
            info!(evicted, resident_bytes, "asset_cache_trimmed");
        }
        evicted
    }

    pub fn entry_count(&self) -> usize {
        self.lock_inner().entries.len()
    }

    /// Stops accepting work and joins the worker threads. In-flight loads
    /// finish first. Called automatically on drop.
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("asset_worker_panicked");
            }
        }
        info!("asset_cache_shut_down");
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_cache_lock_poison_once("lock");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for AssetCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<Mutex<CacheInner>>, receiver: Arc<Mutex<Receiver<LoadJob>>>) {
    loop {
        let job = {
            let guard = match receiver.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn_cache_lock_poison_once("worker_recv");
                    poisoned.into_inner()
                }
            };
            guard.recv()
        };
        let job = match job {
            Ok(job) => job,
            // Channel closed: the cache is shutting down.
            Err(_) => return,
        };

        debug!(key = %job.key, "asset_load_started");
        let result = (job.loader)(&job.key);

        let mut inner = match inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_cache_lock_poison_once("worker_store");
                poisoned.into_inner()
            }
        };
        match inner.entries.get_mut(&job.key) {
            Some(entry) if entry.epoch == job.epoch => match result {
                Ok(data) => {
                    info!(key = %job.key, size_bytes = data.size_bytes(), "asset_loaded");
                    entry.state = EntryState::Ready(Arc::new(data));
                }
                Err(error) => {
                    warn!(key = %job.key, error = %error, "asset_load_failed");
                    entry.state = EntryState::Failed(error);
                }
            },
            _ => debug!(key = %job.key, "stale_load_discarded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::super::key::AssetKind;
    use super::*;

    fn key(path: &str) -> AssetKey {
        AssetKey::new(AssetKind::Raw, path, "").expect("key")
    }

    fn counting_loader(counter: Arc<AtomicUsize>, payload: &'static str) -> AssetLoader {
        Box::new(move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(AssetData::new(payload.to_string(), payload.len()))
        })
    }

    fn failing_loader(message: &'static str) -> AssetLoader {
        Box::new(move |key| {
            Err(LoadError::Decode {
                key: key.to_string(),
                message: message.to_string(),
            })
        })
    }

    fn wait_for_settled(cache: &AssetCache, handle: &AssetHandle) -> AssetStatus {
        for _ in 0..1_000 {
            let status = cache.poll(handle);
            if !status.is_pending() {
                return status;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("asset load did not settle in time");
    }

    #[test]
    fn acquire_returns_immediately_and_load_completes() {
        let cache = AssetCache::new(2).expect("cache");
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = cache.acquire(key("a.bin"), counting_loader(Arc::clone(&counter), "abc"));

        let status = wait_for_settled(&cache, &handle);
        let data = match status {
            AssetStatus::Ready(data) => data,
            other => panic!("expected ready, got {other:?}"),
        };
        assert_eq!(data.downcast_ref::<String>().map(String::as_str), Some("abc"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        cache.release(handle);
    }

    #[test]
    fn equal_keys_deduplicate_to_one_loader_invocation() {
        let cache = AssetCache::new(2).expect("cache");
        let counter = Arc::new(AtomicUsize::new(0));
        let first = cache.acquire(key("dup.bin"), counting_loader(Arc::clone(&counter), "x"));
        let second = cache.acquire(key("dup.bin"), counting_loader(Arc::clone(&counter), "x"));

        wait_for_settled(&cache, &first);
        assert!(wait_for_settled(&cache, &second).is_ready());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        cache.release(first);
        cache.release(second);
    }

    #[test]
    fn concurrent_acquires_share_one_load() {
        let cache = Arc::new(AssetCache::new(4).expect("cache"));
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let mut threads = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            threads.push(std::thread::spawn(move || {
                barrier.wait();
                let handle =
                    cache.acquire(key("shared.bin"), counting_loader(counter, "shared"));
                let status = wait_for_settled(&cache, &handle);
                assert!(status.is_ready());
                cache.release(handle);
            }));
        }
        for thread in threads {
            thread.join().expect("acquire thread");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn pending_survives_partial_release() {
        let cache = AssetCache::new(1).expect("cache");
        // Loader blocks until we let it finish, so the entry stays Pending.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let slow: AssetLoader = Box::new(move |_key| {
            let _ = gate_rx.recv();
            Ok(AssetData::new(Vec::<u8>::new(), 0))
        });
        let first = cache.acquire(key("slow.bin"), slow);
        let second = cache.acquire(key("slow.bin"), Box::new(|_| unreachable!()));

        cache.release(second);
        assert!(cache.poll(&first).is_pending());

        gate_tx.send(()).expect("unblock loader");
        assert!(wait_for_settled(&cache, &first).is_ready());
        cache.release(first);
    }

    #[test]
    fn failed_load_is_surfaced_and_sticky() {
        let cache = AssetCache::new(1).expect("cache");
        let handle = cache.acquire(key("broken.bin"), failing_loader("bad header"));

        let status = wait_for_settled(&cache, &handle);
        assert!(matches!(status, AssetStatus::Failed(LoadError::Decode { .. })));

        // A second acquire sees the same failed entry without a reload.
        let again = cache.acquire(key("broken.bin"), Box::new(|_| unreachable!()));
        assert!(matches!(
            cache.poll(&again),
            AssetStatus::Failed(LoadError::Decode { .. })
        ));
        cache.release(handle);
        cache.release(again);
    }

    #[test]
    fn invalidate_refuses_while_referenced() {
        let cache = AssetCache::new(1).expect("cache");
        let handle = cache.acquire(key("held.bin"), failing_loader("nope"));
        wait_for_settled(&cache, &handle);

        assert!(matches!(
            cache.invalidate(handle.key()),
            Err(CacheError::InvalidateInUse { .. })
        ));
        cache.release(handle);
        assert!(cache.invalidate(&key("held.bin")).is_ok());
    }

    #[test]
    fn invalidate_unknown_key_errors() {
        let cache = AssetCache::new(1).expect("cache");
        assert!(matches!(
            cache.invalidate(&key("never-seen.bin")),
            Err(CacheError::UnknownKey { .. })
        ));
    }

    #[test]
    fn reacquire_after_invalidate_reloads() {
        let cache = AssetCache::new(1).expect("cache");
        let counter = Arc::new(AtomicUsize::new(0));

        let first = cache.acquire(key("r.bin"), counting_loader(Arc::clone(&counter), "v1"));
        wait_for_settled(&cache, &first);
        cache.release(first);
        cache.invalidate(&key("r.bin")).expect("invalidate");

        let second = cache.acquire(key("r.bin"), counting_loader(Arc::clone(&counter), "v2"));
        assert!(wait_for_settled(&cache, &second).is_ready());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        cache.release(second);
    }

    #[test]
    fn stale_inflight_result_is_discarded_after_invalidate() {
        let cache = AssetCache::new(1).expect("cache");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let stale: AssetLoader = Box::new(move |_key| {
            let _ = gate_rx.recv();
            Ok(AssetData::new("stale".to_string(), 5))
        });

        let first = cache.acquire(key("s.bin"), stale);
        cache.release(first);
        cache.invalidate(&key("s.bin")).expect("invalidate");

        let second = cache.acquire(
            key("s.bin"),
            Box::new(|_| Ok(AssetData::new("fresh".to_string(), 5))),
        );
        // Let the stale loader finish after the new entry exists.
        gate_tx.send(()).expect("unblock stale loader");

        let status = wait_for_settled(&cache, &second);
        let data = match status {
            AssetStatus::Ready(data) => data,
            other => panic!("expected ready, got {other:?}"),
        };
        assert_eq!(
            data.downcast_ref::<String>().map(String::as_str),
            Some("fresh")
        );
        cache.release(second);
    }

    #[test]
    fn trim_evicts_least_recently_released_first() {
        let cache = AssetCache::new(1).expect("cache");
        let make = |path: &str| {
            let loader: AssetLoader =
                Box::new(|_| Ok(AssetData::new(vec![0u8; 100], 100)));
            cache.acquire(key(path), loader)
        };

        let a = make("a.bin");
        let b = make("b.bin");
        wait_for_settled(&cache, &a);
        wait_for_settled(&cache, &b);
        cache.release(a);
        cache.release(b);

        // Budget fits one entry; "a" was released first, so it goes.
        let evicted = cache.trim(100);
        assert_eq!(evicted, 1);
        assert_eq!(cache.entry_count(), 1);

        let b_again = cache.acquire(key("b.bin"), Box::new(|_| unreachable!()));
        assert!(cache.poll(&b_again).is_ready());
        cache.release(b_again);
    }

    #[test]
    fn reacquire_before_trim_reuses_resident_data() {
        let cache = AssetCache::new(1).expect("cache");
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = cache.acquire(key("warm.bin"), counting_loader(Arc::clone(&counter), "w"));
        wait_for_settled(&cache, &handle);
        cache.release(handle);

        let again = cache.acquire(key("warm.bin"), Box::new(|_| unreachable!()));
        assert!(cache.poll(&again).is_ready());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Referenced again, so a zero-budget trim must not evict it.
        assert_eq!(cache.trim(0), 0);
        cache.release(again);
    }

    #[test]
    fn referenced_entries_survive_zero_budget_trim() {
        let cache = AssetCache::new(1).expect("cache");
        let handle = cache.acquire(
            key("pinned.bin"),
            Box::new(|_| Ok(AssetData::new(vec![1u8; 64], 64))),
        );
        wait_for_settled(&cache, &handle);

        assert_eq!(cache.trim(0), 0);
        assert_eq!(cache.entry_count(), 1);
        cache.release(handle);
    }

    #[test]
    fn file_loader_reads_bytes_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("blob.bin"), b"payload").expect("write");

        let cache = AssetCache::new(1).expect("cache");
        let handle = cache.acquire(key("blob.bin"), file_bytes_loader(dir.path()));
        let status = wait_for_settled(&cache, &handle);
        let data = match status {
            AssetStatus::Ready(data) => data,
            other => panic!("expected ready, got {other:?}"),
        };
        assert_eq!(
            data.downcast_ref::<Vec<u8>>().map(Vec::as_slice),
            Some(b"payload".as_slice())
        );
        assert_eq!(data.size_bytes(), 7);
        cache.release(handle);
    }

    #[test]
    fn file_loader_missing_file_fails_with_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = AssetCache::new(1).expect("cache");
        let handle = cache.acquire(key("missing.bin"), file_bytes_loader(dir.path()));
        assert!(matches!(
            wait_for_settled(&cache, &handle),
            AssetStatus::Failed(LoadError::Io { .. })
        ));
        cache.release(handle);
    }

    #[test]
    fn acquire_after_shutdown_fails_fast() {
        let mut cache = AssetCache::new(1).expect("cache");
        cache.shutdown();
        let handle = cache.acquire(key("late.bin"), Box::new(|_| unreachable!()));
        assert!(matches!(
            cache.poll(&handle),
            AssetStatus::Failed(LoadError::PoolShutDown)
        ));
        cache.release(handle);
    }
}
