use image::RgbaImage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::canvas::ClassBuffer;

/// Images kept decoded by default: the current one and its two neighbours.
pub const DEFAULT_CAPACITY: usize = 3;

/// A decoded image and, when one exists on disk, its decoded annotation.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub image: Arc<RgbaImage>,
    pub mask: Option<Arc<ClassBuffer>>,
}

impl CacheEntry {
    pub fn new(image: RgbaImage, mask: Option<ClassBuffer>) -> Self {
        Self {
            image: Arc::new(image),
            mask: mask.map(Arc::new),
        }
    }

    /// Approximate heap size, for logging.
    pub fn memory_size(&self) -> usize {
        self.image.as_raw().len() + self.mask.as_ref().map_or(0, |m| m.as_raw().len())
    }
}

/// Bounded LRU of decoded entries keyed by image id.
///
/// Not synchronised itself; the controller wraps it in a `Mutex` so the
/// decode workers and the owner thread take turns.
pub struct AnnotationCache {
    entries: LruCache<String, CacheEntry>,
}

impl Default for AnnotationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AnnotationCache {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up `key`, promoting it to most-recently-used.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    /// Insert or replace `key` as most-recently-used, evicting the
    /// least-recently-used entry when full.
    pub fn put(&mut self, key: impl Into<String>, entry: CacheEntry) {
        let key = key.into();
        if let Some((evicted, old)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!("cache evicted '{}' ({} bytes)", evicted, old.memory_size());
            }
        }
    }

    pub fn invalidate(&mut self, key: &str) {
        if self.entries.pop(key).is_some() {
            tracing::debug!("cache invalidated '{}'", key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Membership check that leaves the recency order alone.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
