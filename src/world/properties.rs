use crate::entities::item::{ItemProperties, Serial};
use lru::LruCache;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_PROPERTY_CACHE_CAPACITY: usize = 1024;

/// Name and tooltip text lookup. Data arrives asynchronously from the
/// server; `request` only asks for it.
pub trait PropertySource: Send + Sync {
    fn properties(&self, serial: Serial) -> Option<ItemProperties>;

    fn request(&self, serial: Serial);
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner {
    entries: LruCache<Serial, ItemProperties>,
    requested: BTreeSet<Serial>,
    stats: PropertyCacheStats,
}

/// Tooltip cache with LRU eviction
pub struct PropertyCache {
    inner: Mutex<CacheInner>,
}

impl Default for PropertyCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROPERTY_CACHE_CAPACITY)
    }
}

impl PropertyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                requested: BTreeSet::new(),
                stats: PropertyCacheStats::default(),
            }),
        }
    }

    /// Stores text received from the server and clears the pending request.
    pub fn insert(&self, serial: Serial, properties: ItemProperties) {
        let mut inner = self.lock();
        inner.requested.remove(&serial);
        if let Some((evicted, _)) = inner.entries.push(serial, properties) {
            if evicted != serial {
                inner.stats.evictions += 1;
            }
        }
    }

    pub fn invalidate(&self, serial: Serial) {
        self.lock().entries.pop(&serial);
    }

    /// Serials asked for but not yet answered, oldest serial first.
    pub fn take_requests(&self) -> Vec<Serial> {
        let mut inner = self.lock();
        std::mem::take(&mut inner.requested).into_iter().collect()
    }

    pub fn is_requested(&self, serial: Serial) -> bool {
        self.lock().requested.contains(&serial)
    }

    pub fn stats(&self) -> PropertyCacheStats {
        self.lock().stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PropertySource for PropertyCache {
    fn properties(&self, serial: Serial) -> Option<ItemProperties> {
        let mut inner = self.lock();
        match inner.entries.get(&serial).cloned() {
            Some(found) => {
                inner.stats.hits += 1;
                Some(found)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    fn request(&self, serial: Serial) {
        self.lock().requested.insert(serial);
    }
}
