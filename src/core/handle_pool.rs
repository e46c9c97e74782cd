//! Bounded TTL pool of open `EdfReader`s (spec §4.D), with a liveness probe
//! and a background sweeper closing stale handles every 30s. The sweeper
//! loop is grounded on the teacher's `main.rs` background-cleanup-task
//! idiom (`tokio::spawn` + `tokio::time::interval`, one of three such
//! loops there for stale connections / expired sessions / rate limiting).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::edf::EdfReader;
use super::error::{CoreError, CoreResult};

struct PooledHandle {
    reader: EdfReader,
    last_used: Instant,
}

struct Inner {
    handles: HashMap<PathBuf, PooledHandle>,
    capacity: usize,
}

/// Shared pool handed to the orchestrator. Holding an `Arc<HandlePool>`
/// and calling `with_reader` is the only supported access pattern — no
/// handle is ever exposed to callers outside the lock's scope.
pub struct HandlePool {
    inner: Mutex<Inner>,
    ttl: Duration,
    shutdown: Arc<AtomicBool>,
}

impl HandlePool {
    pub fn new(capacity: usize, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { handles: HashMap::new(), capacity: capacity.max(1) }),
            ttl,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs `f` against a live, liveness-probed reader for `path`, opening
    /// one if absent and evicting the least-recently-used handle if the
    /// pool is at capacity (spec §4.D "bounded").
    pub fn with_reader<T>(
        &self,
        path: &PathBuf,
        f: impl FnOnce(&mut EdfReader) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut inner = self.inner.lock();

        let needs_open = match inner.handles.get_mut(path) {
            Some(pooled) => !pooled.reader.liveness_probe(),
            None => true,
        };

        if needs_open {
            inner.handles.remove(path);
            if inner.handles.len() >= inner.capacity {
                if let Some(lru_key) = inner
                    .handles
                    .iter()
                    .min_by_key(|(_, h)| h.last_used)
                    .map(|(k, _)| k.clone())
                {
                    inner.handles.remove(&lru_key);
                    tracing::debug!(path = %lru_key.display(), "handle pool evicted (capacity)");
                }
            }
            let reader = EdfReader::open(path)?;
            inner.handles.insert(path.clone(), PooledHandle { reader, last_used: Instant::now() });
        }

        let pooled = inner
            .handles
            .get_mut(path)
            .ok_or_else(|| CoreError::HandleUnusable(path.clone()))?;
        pooled.last_used = Instant::now();
        f(&mut pooled.reader)
    }

    pub fn invalidate(&self, path: &PathBuf) {
        self.inner.lock().handles.remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Closes handles idle past the TTL or that fail a fresh liveness probe.
    fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stale: Vec<PathBuf> = inner
            .handles
            .iter_mut()
            .filter(|(_, h)| now.duration_since(h.last_used) > self.ttl || !h.reader.liveness_probe())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            inner.handles.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(closed = stale.len(), "handle pool sweep closed stale handles");
        }
    }

    /// Marks the pool shut down (the sweeper observes this at its next tick
    /// and stops, never restarting) and closes every open handle immediately
    /// (spec §4.D `close_all`).
    pub fn close_all(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let closed = inner.handles.len();
        inner.handles.clear();
        if closed > 0 {
            tracing::info!(closed, "handle pool closed all handles on shutdown");
        }
    }
}

/// Spawns the 30s sweep loop. Sleeps 60s and retries after a sweep panic
/// path is unreachable (the sweep itself cannot fail); never restarts once
/// `shutdown()` has been called, mirroring the teacher's cleanup loops
/// which simply stop being polled when the server task set is dropped.
pub fn spawn_sweeper(pool: Arc<HandlePool>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if pool.shutdown.load(Ordering::SeqCst) {
                break;
            }
            pool.sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_edf(path: &std::path::Path) {
        let mut f = std::fs::File::create(path).unwrap();
        let mut header = vec![b' '; 256];
        header[0..8].copy_from_slice(b"0       ");
        let header_bytes_str = format!("{:<8}", 256 + 256);
        header[184..192].copy_from_slice(header_bytes_str.as_bytes());
        header[236..244].copy_from_slice(b"1       ");
        header[244..252].copy_from_slice(b"1       ");
        header[252..256].copy_from_slice(b"1   ");
        header[192..236].copy_from_slice(&[b' '; 44]);
        f.write_all(&header).unwrap();

        let mut sig = vec![b' '; 256];
        sig[0..16].copy_from_slice(b"ch1             ");
        let nsamp = format!("{:<8}", 4);
        sig[216..224].copy_from_slice(nsamp.as_bytes());
        f.write_all(&sig).unwrap();

        let samples: [i16; 4] = [1, 2, 3, 4];
        for s in samples {
            f.write_all(&s.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn opens_and_reuses_handle() {
        let dir = std::env::temp_dir().join(format!("handle_pool_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.edf");
        write_minimal_edf(&path);

        let pool = HandlePool::new(2, Duration::from_secs(180));
        let n1 = pool.with_reader(&path, |r| Ok(r.num_signals())).unwrap();
        assert_eq!(n1, 1);
        assert_eq!(pool.len(), 1);
        let n2 = pool.with_reader(&path, |r| Ok(r.num_signals())).unwrap();
        assert_eq!(n2, 1);
        assert_eq!(pool.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let dir = std::env::temp_dir().join(format!("handle_pool_test_cap_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pa = dir.join("a.edf");
        let pb = dir.join("b.edf");
        let pc = dir.join("c.edf");
        write_minimal_edf(&pa);
        write_minimal_edf(&pb);
        write_minimal_edf(&pc);

        let pool = HandlePool::new(2, Duration::from_secs(180));
        pool.with_reader(&pa, |r| Ok(r.num_signals())).unwrap();
        pool.with_reader(&pb, |r| Ok(r.num_signals())).unwrap();
        pool.with_reader(&pc, |r| Ok(r.num_signals())).unwrap();
        assert_eq!(pool.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
