//! Raw chunk cache (spec §4.C): dual-bounded LRU (byte budget + count
//! budget), storing only RAW chunks — preprocessing is never cached and is
//! re-applied by the caller to a fresh `deep_clone()` on every hit (spec §3
//! "raw-only" invariant, §4.C). Same `HashMap` + `VecDeque` insertion-order
//! eviction idiom as `metadata_cache`, generalized with a byte-size budget.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use super::edf::EdfChunk;

/// Cache key: a raw chunk is identified by its source file and sample
/// window — never by preprocessing options (those are applied post-hit).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub path: PathBuf,
    pub chunk_start_samples: i64,
    pub chunk_end_samples: i64,
}

fn estimate_bytes(chunk: &EdfChunk) -> usize {
    chunk
        .signals
        .iter()
        .map(|s| s.samples.len() * std::mem::size_of::<f64>() + s.label.len())
        .sum::<usize>()
        + 256
}

struct Entry {
    chunk: Arc<EdfChunk>,
    bytes: usize,
}

struct Inner {
    map: HashMap<ChunkKey, Entry>,
    order: VecDeque<ChunkKey>,
    total_bytes: usize,
    max_bytes: usize,
    max_entries: usize,
}

impl Inner {
    fn touch(&mut self, key: &ChunkKey) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }

    fn evict_lru(&mut self) {
        while (self.map.len() > self.max_entries || self.total_bytes > self.max_bytes)
            && !self.order.is_empty()
        {
            if let Some(old_key) = self.order.pop_front() {
                if let Some(entry) = self.map.remove(&old_key) {
                    self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
                    tracing::debug!(path = %old_key.path.display(), "chunk cache evicted");
                }
            }
        }
    }
}

/// Shared raw-chunk cache. `get` returns a deep copy — callers may mutate
/// (e.g. apply preprocessing) freely without corrupting the cached entry.
pub struct ChunkCache {
    inner: Mutex<Inner>,
}

impl ChunkCache {
    pub fn new(max_bytes: usize, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                total_bytes: 0,
                max_bytes: max_bytes.max(1),
                max_entries: max_entries.max(1),
            }),
        }
    }

    /// Returns a deep clone of the cached raw chunk, or `None` on a miss.
    pub fn get(&self, key: &ChunkKey) -> Option<EdfChunk> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.map.get(key) {
            let chunk = entry.chunk.clone();
            inner.touch(key);
            Some(chunk.deep_clone())
        } else {
            None
        }
    }

    /// Inserts a RAW chunk (caller must not have applied preprocessing).
    pub fn insert(&self, key: ChunkKey, chunk: EdfChunk) {
        let bytes = estimate_bytes(&chunk);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.map.remove(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes);
            inner.order.retain(|k| k != &key);
        }

        inner.total_bytes += bytes;
        inner.map.insert(key.clone(), Entry { chunk: Arc::new(chunk), bytes });
        inner.order.push_back(key);
        inner.evict_lru();
    }

    pub fn invalidate_path(&self, path: &PathBuf) {
        let mut inner = self.inner.lock();
        let stale: Vec<ChunkKey> = inner.map.keys().filter(|k| &k.path == path).cloned().collect();
        for key in stale {
            if let Some(entry) = inner.map.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.bytes);
            }
            inner.order.retain(|k| k != &key);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk_with(n_samples: usize) -> EdfChunk {
        EdfChunk {
            labels: vec!["ch1".to_string()],
            signals: vec![super::super::edf::SignalChunk {
                label: "ch1".to_string(),
                samples: vec![0.0; n_samples],
                sampling_frequency_hz: 256.0,
                physical_min: -1000.0,
                physical_max: 1000.0,
                digital_min: -2048,
                digital_max: 2047,
            }],
            chunk_start_samples: 0,
            chunk_end_samples: n_samples as i64,
            chunk_size_samples: n_samples as i64,
            start_datetime: Utc::now(),
        }
    }

    fn key(n: i64) -> ChunkKey {
        ChunkKey { path: PathBuf::from("/data/a.edf"), chunk_start_samples: 0, chunk_end_samples: n }
    }

    #[test]
    fn hit_returns_independent_deep_copy() {
        let cache = ChunkCache::new(10_000_000, 200);
        cache.insert(key(100), chunk_with(100));
        let mut first = cache.get(&key(100)).unwrap();
        first.signals[0].samples[0] = 999.0;

        let second = cache.get(&key(100)).unwrap();
        assert_eq!(second.signals[0].samples[0], 0.0);
    }

    #[test]
    fn count_budget_evicts_oldest() {
        let cache = ChunkCache::new(10_000_000, 2);
        cache.insert(key(1), chunk_with(10));
        cache.insert(key(2), chunk_with(10));
        cache.insert(key(3), chunk_with(10));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn byte_budget_evicts_when_exceeded() {
        let cache = ChunkCache::new(200, 200);
        cache.insert(key(1), chunk_with(100));
        assert!(cache.total_bytes() > 0);
        cache.insert(key(2), chunk_with(100));
        assert!(cache.total_bytes() <= 200 || cache.len() < 2);
    }
}
