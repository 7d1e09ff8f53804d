/// In-memory thumbnail cache
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

/// Encoded thumbnail bytes, shared between the cache and every caller
pub type Thumbnail = Arc<[u8]>;

/// A thumbnail is identified by its source and its edge length
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub size: u32,
}

impl CacheKey {
    pub fn new(path: &Path, size: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
        }
    }
}

/// Called with each entry the cache drops to make room
pub type EvictionCallback = Box<dyn Fn(&CacheKey, &Thumbnail) + Send + Sync>;

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Bounded LRU map of thumbnails, safe to share between worker tasks.
///
/// Entries are never invalidated when the source changes on disk; call
/// [`ThumbnailCache::invalidate`] or [`ThumbnailCache::clear`] for that.
pub struct ThumbnailCache {
    entries: Mutex<LruCache<CacheKey, Thumbnail>>,
    on_evict: Option<EvictionCallback>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ThumbnailCache {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            on_evict: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_eviction_callback(
        mut self,
        callback: impl Fn(&CacheKey, &Thumbnail) + Send + Sync + 'static,
    ) -> Self {
        self.on_evict = Some(Box::new(callback));
        self
    }

    /// Look up and mark as recently used
    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        let found = self.lock().get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert, evicting the least recently used entry when full
    pub fn insert(&self, key: CacheKey, thumbnail: Thumbnail) {
        let evicted = {
            let mut entries = self.lock();
            match entries.push(key.clone(), thumbnail) {
                // Same key: the old value was replaced, nothing was evicted
                Some((old_key, _)) if old_key == key => None,
                other => other,
            }
        };

        if let Some((old_key, old_value)) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted thumbnail {} ({}px)", old_key.path.display(), old_key.size);
            if let Some(callback) = &self.on_evict {
                callback(&old_key, &old_value);
            }
        }
    }

    /// Drop every size of the thumbnail for `path`
    pub fn invalidate(&self, path: &Path) -> usize {
        let mut entries = self.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.path == path)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    // Poisoned locks are recovered; the map is still a valid LRU.
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Thumbnail>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("stats", &self.stats())
            .finish()
    }
}
