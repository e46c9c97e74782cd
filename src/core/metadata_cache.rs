//! FileMetadata cache (spec §4.B): LRU + TTL, grounded on the sibling
//! package's `LruCache<V>` (HashMap + VecDeque insertion-order eviction,
//! `Arc<V>`-wrapped values) extended with a per-entry expiry instant.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::edf::FileMetadata;

struct Entry {
    value: Arc<FileMetadata>,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<PathBuf, Entry>,
    order: VecDeque<PathBuf>,
    max_size: usize,
    ttl: Duration,
}

impl Inner {
    fn evict_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<PathBuf> = self
            .map
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.map.remove(&key);
            self.order.retain(|k| k != &key);
            tracing::debug!(path = %key.display(), "metadata cache entry expired");
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.map.len() >= self.max_size && !self.order.is_empty() {
            if let Some(old_key) = self.order.pop_front() {
                self.map.remove(&old_key);
                tracing::debug!(path = %old_key.display(), "metadata cache evicted (capacity)");
            }
        }
    }
}

/// Shared metadata cache handed to the orchestrator (spec §4.E).
pub struct MetadataCache {
    inner: Mutex<Inner>,
}

impl MetadataCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                max_size: max_size.max(1),
                ttl,
            }),
        }
    }

    pub fn get(&self, path: &PathBuf) -> Option<Arc<FileMetadata>> {
        let mut inner = self.inner.lock();
        inner.evict_expired();
        let value = inner.map.get(path).map(|e| e.value.clone())?;
        inner.order.retain(|k| k != path);
        inner.order.push_back(path.clone());
        Some(value)
    }

    pub fn insert(&self, path: PathBuf, metadata: FileMetadata) -> Arc<FileMetadata> {
        let value = Arc::new(metadata);
        let mut inner = self.inner.lock();
        inner.evict_expired();

        if inner.map.contains_key(&path) {
            inner.order.retain(|k| k != &path);
        }
        inner.evict_to_capacity();

        let expires_at = Instant::now() + inner.ttl;
        inner.map.insert(
            path.clone(),
            Entry { value: value.clone(), expires_at },
        );
        inner.order.push_back(path);
        value
    }

    pub fn invalidate(&self, path: &PathBuf) {
        let mut inner = self.inner.lock();
        inner.map.remove(path);
        inner.order.retain(|k| k != path);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> FileMetadata {
        FileMetadata {
            total_samples: 1000,
            num_signals: 2,
            signal_labels: vec!["a".to_string(), "b".to_string()],
            sampling_frequencies: vec![256.0, 256.0],
            file_duration_seconds: 10.0,
        }
    }

    #[test]
    fn get_after_insert_hits() {
        let cache = MetadataCache::new(10, Duration::from_secs(60));
        let path = PathBuf::from("/data/a.edf");
        cache.insert(path.clone(), sample_metadata());
        assert!(cache.get(&path).is_some());
    }

    #[test]
    fn ttl_expiry_evicts_entry() {
        let cache = MetadataCache::new(10, Duration::from_millis(1));
        let path = PathBuf::from("/data/a.edf");
        cache.insert(path.clone(), sample_metadata());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&path).is_none());
    }

    #[test]
    fn get_promotes_to_mru() {
        let cache = MetadataCache::new(2, Duration::from_secs(60));
        let a = PathBuf::from("/data/a.edf");
        let b = PathBuf::from("/data/b.edf");
        let c = PathBuf::from("/data/c.edf");
        cache.insert(a.clone(), sample_metadata());
        cache.insert(b.clone(), sample_metadata());
        // touch `a` so `b` becomes the least-recently-used entry
        assert!(cache.get(&a).is_some());
        cache.insert(c.clone(), sample_metadata());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = MetadataCache::new(2, Duration::from_secs(60));
        let a = PathBuf::from("/data/a.edf");
        let b = PathBuf::from("/data/b.edf");
        let c = PathBuf::from("/data/c.edf");
        cache.insert(a.clone(), sample_metadata());
        cache.insert(b.clone(), sample_metadata());
        cache.insert(c.clone(), sample_metadata());
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
    }
}
