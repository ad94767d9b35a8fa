//! LRU, content-addressed local cache keyed by `(deviceId, storageId,
//! handle)` (component C11, spec §4.12). Grounded on the teacher's
//! `rpkg` package-download idiom (`sha2` content hash, `tempfile` +
//! atomic rename into place) applied to MTP object bytes instead of
//! package archives.

pub mod error;

pub use error::CacheError;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device_id: String,
    pub storage_id: u32,
    pub handle: u32,
}

impl CacheKey {
    pub fn new(device_id: impl Into<String>, storage_id: u32, handle: u32) -> Self {
        Self { device_id: device_id.into(), storage_id, handle }
    }
}

/// Observable state of a cache entry (spec §4.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Miss,
    Downloading,
    Partial { committed: u64 },
    Hit { path: PathBuf },
}

struct Entry {
    state: EntryState,
    size_bytes: u64,
    last_accessed_at: i64,
    waiters: Vec<oneshot::Sender<Result<PathBuf, CacheError>>>,
}

#[derive(Clone)]
enum EntryState {
    Downloading { committed: u64 },
    Ready { path: PathBuf },
}

enum MaterializeRole {
    Lead,
    Wait(oneshot::Receiver<Result<PathBuf, CacheError>>),
}

struct Shared {
    entries: HashMap<CacheKey, Entry>,
    cache_dir: PathBuf,
    max_size_bytes: u64,
}

/// Handle to the cache. Clones share the same backing map and mutex.
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<Mutex<Shared>>,
}

impl ContentCache {
    pub fn new(cache_dir: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        let cache_dir = cache_dir.into();
        let _ = std::fs::create_dir_all(&cache_dir);
        Self { inner: Arc::new(Mutex::new(Shared { entries: HashMap::new(), cache_dir, max_size_bytes })) }
    }

    pub async fn state(&self, key: &CacheKey) -> CacheState {
        let mut shared = self.inner.lock().await;
        match entry_state_checked(&mut shared, key) {
            Some(EntryState::Ready { path }) => CacheState::Hit { path },
            Some(EntryState::Downloading { committed }) => {
                if committed == 0 {
                    CacheState::Downloading
                } else {
                    CacheState::Partial { committed }
                }
            }
            None => CacheState::Miss,
        }
    }

    /// Guarantees at-most-one concurrent download per key (spec §4.12,
    /// §8.1): the first caller for a cold key runs `fetch`; any concurrent
    /// caller for the same key observes `Downloading` and awaits the same
    /// result instead of starting a second download.
    pub async fn materialize<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<PathBuf, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<u64, CacheError>>,
    {
        let role = {
            let mut shared = self.inner.lock().await;
            match entry_state_checked(&mut shared, &key) {
                Some(EntryState::Ready { path }) => {
                    touch(&mut shared, &key);
                    return Ok(path);
                }
                Some(EntryState::Downloading { .. }) => {
                    let (tx, rx) = oneshot::channel();
                    shared.entries.get_mut(&key).unwrap().waiters.push(tx);
                    MaterializeRole::Wait(rx)
                }
                None => {
                    shared.entries.insert(
                        key.clone(),
                        Entry { state: EntryState::Downloading { committed: 0 }, size_bytes: 0, last_accessed_at: now_millis(), waiters: Vec::new() },
                    );
                    MaterializeRole::Lead
                }
            }
        };

        match role {
            MaterializeRole::Lead => {
                let result = self.run_download(&key, fetch).await;
                self.finish_download(&key, result.clone()).await;
                result
            }
            MaterializeRole::Wait(rx) => rx.await.map_err(|_| CacheError::FetchCancelled)?,
        }
    }

    async fn run_download<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<PathBuf, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<u64, CacheError>>,
    {
        let cache_dir = self.inner.lock().await.cache_dir.clone();
        let temp = tempfile::NamedTempFile::new_in(&cache_dir)?;
        let temp_path = temp.path().to_path_buf();
        fetch(temp_path.clone()).await?;

        let hash = hash_file(&temp_path)?;
        let final_path = cas_path(&cache_dir, &hash);
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if final_path.exists() {
            debug!(hash, "content already present in cache, deduplicating");
        } else {
            std::fs::rename(&temp_path, &final_path)?;
        }
        drop(temp);
        Ok(final_path)
    }

    async fn finish_download(&self, key: &CacheKey, result: Result<PathBuf, CacheError>) {
        let mut shared = self.inner.lock().await;
        let Some(entry) = shared.entries.get_mut(key) else { return };
        let waiters = std::mem::take(&mut entry.waiters);
        match &result {
            Ok(path) => {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                entry.state = EntryState::Ready { path: path.clone() };
                entry.size_bytes = size;
                entry.last_accessed_at = now_millis();
            }
            Err(_) => {
                shared.entries.remove(key);
            }
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        evict_to_fit(&mut shared);
    }

    /// Evicts entries by `lastAccessedAt` until the total cached size is
    /// `<= max_size_bytes` (spec §4.12 LRU eviction).
    pub async fn evict(&self) {
        let mut shared = self.inner.lock().await;
        evict_to_fit(&mut shared);
    }
}

fn entry_state_checked(shared: &mut Shared, key: &CacheKey) -> Option<EntryState> {
    let state = shared.entries.get(key).map(|e| e.state.clone())?;
    if let EntryState::Ready { path } = &state {
        if !path.exists() {
            shared.entries.remove(key);
            return None;
        }
    }
    Some(state)
}

fn touch(shared: &mut Shared, key: &CacheKey) {
    if let Some(entry) = shared.entries.get_mut(key) {
        entry.last_accessed_at = now_millis();
    }
}

fn evict_to_fit(shared: &mut Shared) {
    let mut total: u64 = shared.entries.values().map(|e| e.size_bytes).sum();
    if total <= shared.max_size_bytes {
        return;
    }
    let mut by_age: Vec<(CacheKey, i64)> = shared.entries.iter().map(|(k, e)| (k.clone(), e.last_accessed_at)).collect();
    by_age.sort_by_key(|(_, accessed)| *accessed);
    for (key, _) in by_age {
        if total <= shared.max_size_bytes {
            break;
        }
        if let Some(entry) = shared.entries.remove(&key) {
            if let EntryState::Ready { path } = entry.state {
                let _ = std::fs::remove_file(&path);
            }
            total = total.saturating_sub(entry.size_bytes);
        }
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn cas_path(cache_dir: &Path, hash: &str) -> PathBuf {
    cache_dir.join(&hash[0..2]).join(hash)
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
