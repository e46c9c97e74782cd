//! `Core`: the single owner of the caches, handle pool, and DDA runner
//! (spec §4.E, §9 Design Notes — "route metadata access through the
//! single Core/orchestrator owner, not a separate file_handle_manager").
//! Constructed once at startup and shared behind an `Arc` by the HTTP
//! handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::channel_selector;
use super::chunk_cache::{ChunkCache, ChunkKey};
use super::dda::{DDAInvocation, DDAResult, DdaErrorKind, DdaRunner};
use super::edf::{self, EdfChunk, EdfReader, FileMetadata, DEFAULT_CHUNK_SIZE};
use super::error::{CoreError, CoreResult};
use super::handle_pool::{self, HandlePool};
use super::metadata_cache::MetadataCache;
use super::preprocessing::{self, PreprocessingOptions};

pub struct CoreConfig {
    pub allowed_roots: Vec<PathBuf>,
    pub metadata_cache_size: usize,
    pub metadata_cache_ttl: Duration,
    pub chunk_cache_bytes: usize,
    pub chunk_cache_max_entries: usize,
    pub handle_pool_size: usize,
    pub handle_pool_ttl: Duration,
    pub handle_pool_sweep_interval: Duration,
    pub preload_enabled: bool,
    pub dda_binary_path: PathBuf,
    /// Declared testability affordance (spec §4.A): when the requested file
    /// is missing, serve a synthetic 10Hz/512Hz record instead of
    /// `FileNotFound`. Off by default; never silent in production.
    pub synthetic_fallback_enabled: bool,
}

/// Per-tier occupancy snapshot for `/edf/cache/stats` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub metadata_entries: usize,
    pub metadata_capacity: usize,
    pub chunk_entries: usize,
    pub chunk_capacity_entries: usize,
    pub chunk_bytes: usize,
    pub chunk_capacity_bytes: usize,
    pub handle_pool_entries: usize,
    pub handle_pool_capacity: usize,
}

pub struct Core {
    allowed_roots: Vec<PathBuf>,
    metadata_cache: MetadataCache,
    chunk_cache: ChunkCache,
    handle_pool: Arc<HandlePool>,
    dda_runner: DdaRunner,
    preload_enabled: bool,
    metadata_cache_size: usize,
    chunk_cache_bytes: usize,
    chunk_cache_max_entries: usize,
    handle_pool_size: usize,
    synthetic_fallback_enabled: bool,
}

impl Core {
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let handle_pool = HandlePool::new(config.handle_pool_size, config.handle_pool_ttl);
        handle_pool::spawn_sweeper(handle_pool.clone(), config.handle_pool_sweep_interval);

        Arc::new(Self {
            allowed_roots: config.allowed_roots,
            metadata_cache: MetadataCache::new(config.metadata_cache_size, config.metadata_cache_ttl),
            chunk_cache: ChunkCache::new(config.chunk_cache_bytes, config.chunk_cache_max_entries),
            handle_pool,
            dda_runner: DdaRunner::new(config.dda_binary_path),
            preload_enabled: config.preload_enabled,
            metadata_cache_size: config.metadata_cache_size,
            chunk_cache_bytes: config.chunk_cache_bytes,
            chunk_cache_max_entries: config.chunk_cache_max_entries,
            handle_pool_size: config.handle_pool_size,
            synthetic_fallback_enabled: config.synthetic_fallback_enabled,
        })
    }

    /// Snapshot of per-tier occupancy against configured capacity.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            metadata_entries: self.metadata_cache.len(),
            metadata_capacity: self.metadata_cache_size,
            chunk_entries: self.chunk_cache.len(),
            chunk_capacity_entries: self.chunk_cache_max_entries,
            chunk_bytes: self.chunk_cache.total_bytes(),
            chunk_capacity_bytes: self.chunk_cache_bytes,
            handle_pool_entries: self.handle_pool.len(),
            handle_pool_capacity: self.handle_pool_size,
        }
    }

    /// Hard precondition for every file-touching operation (spec §6,
    /// invariant 10): the resolved path must sit under one of the
    /// configured allowed roots. Canonicalizes (resolving symlinks) when
    /// the file exists; falls back to lexical resolution for a file that
    /// doesn't (so a missing-but-allowed path can still reach
    /// `FileNotFound`, or the synthetic-fallback path, instead of being
    /// misreported as forbidden).
    fn enforce_allowlist(&self, path: &Path) -> CoreResult<PathBuf> {
        match path.canonicalize() {
            Ok(canonical) => {
                if !self.allowed_roots.iter().any(|root| canonical.starts_with(root)) {
                    return Err(CoreError::PathForbidden(canonical));
                }
                Ok(canonical)
            }
            Err(_) => self.resolve_under_allowlist(path),
        }
    }

    /// Allowlist check that doesn't require the path to exist, for callers
    /// (DDA) that must reject a forbidden path before they know whether the
    /// file is even there (spec §7 invariant 7: `run_dda` never raises for
    /// "nonexistent paths", but spec §6 still makes the allowlist check a
    /// hard precondition of §4.G).
    fn resolve_under_allowlist(&self, path: &Path) -> CoreResult<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        };
        let normalized = normalize_lexically(&absolute);
        let allowed = self.allowed_roots.iter().any(|root| normalized.starts_with(root));
        if !allowed {
            return Err(CoreError::PathForbidden(normalized));
        }
        Ok(normalized)
    }

    pub fn get_metadata(&self, path: &Path) -> CoreResult<Arc<FileMetadata>> {
        let path = self.enforce_allowlist(path)?;
        if let Some(cached) = self.metadata_cache.get(&path) {
            return Ok(cached);
        }
        let metadata = match self.handle_pool.with_reader(&path, |r| Ok(r.read_header())) {
            Ok(metadata) => metadata,
            Err(CoreError::FileNotFound(_)) if self.synthetic_fallback_enabled => {
                tracing::warn!(path = %path.display(), "EDF library unavailable, serving synthetic metadata");
                edf::synthetic_reader_metadata()
            }
            Err(e) => return Err(e),
        };
        Ok(self.metadata_cache.insert(path, metadata))
    }

    /// Reads a chunk, applying `options` to a fresh copy of whatever was
    /// cached or freshly decoded (spec §4.C "raw-only" invariant — the
    /// cache never stores a preprocessed chunk), then schedules a
    /// best-effort preload of the adjacent chunks (spec §4.E "Preload
    /// task").
    pub fn read_chunk(
        self: &Arc<Self>,
        path: &Path,
        chunk_start: i64,
        chunk_size: i64,
        selected: Option<&[usize]>,
        options: &PreprocessingOptions,
    ) -> CoreResult<EdfChunk> {
        let path = self.enforce_allowlist(path)?;
        let (mut chunk, chunk_start, chunk_size) = self.read_chunk_raw(&path, chunk_start, chunk_size)?;

        if let Some(indices) = selected {
            chunk.labels = indices
                .iter()
                .filter_map(|&i| chunk.labels.get(i).cloned())
                .collect();
            chunk.signals = indices
                .iter()
                .filter_map(|&i| chunk.signals.get(i).cloned())
                .collect();
        }

        for signal in chunk.signals.iter_mut() {
            preprocessing::apply(signal, options);
        }

        self.schedule_preload(path, chunk_start, chunk_size);

        Ok(chunk)
    }

    /// Cache-or-decode step shared by the synchronous read path and
    /// preload tasks, without the selection/preprocessing/rescheduling that
    /// only the synchronous path performs (preloads never cascade further
    /// preloads — spec §4.E schedules preload only from the requester's
    /// own read, not transitively from a preload's own read).
    fn read_chunk_raw(
        &self,
        path: &Path,
        chunk_start: i64,
        chunk_size: i64,
    ) -> CoreResult<(EdfChunk, i64, i64)> {
        let chunk_start = chunk_start.max(0);
        let chunk_size = if chunk_size <= 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        let key = ChunkKey {
            path: path.to_path_buf(),
            chunk_start_samples: chunk_start,
            chunk_end_samples: chunk_start + chunk_size,
        };

        let chunk = if let Some(cached) = self.chunk_cache.get(&key) {
            cached
        } else {
            // Deliberately bypasses the handle pool: the reader library can
            // report a stale handle as valid (spec §4.D/§4.E known issue),
            // so a chunk miss always gets a dedicated open-read-close cycle.
            let chunk = match EdfReader::open(path) {
                Ok(mut reader) => reader.read_chunk(chunk_start, chunk_size, None)?.0,
                Err(CoreError::FileNotFound(_)) if self.synthetic_fallback_enabled => {
                    tracing::warn!(path = %path.display(), "EDF library unavailable, serving synthetic chunk");
                    edf::synthetic_chunk(chunk_start, chunk_size).0
                }
                Err(e) => return Err(e),
            };
            self.chunk_cache.insert(key, chunk.deep_clone());
            chunk
        };

        Ok((chunk, chunk_start, chunk_size))
    }

    /// Schedules best-effort preload of the chunks immediately following
    /// and preceding this one, skipping either when it's already cached or
    /// out of bounds (spec §4.E "Preload task"). Failures are logged and
    /// swallowed, never surfaced to the caller (spec §7 `PreloadFailed`).
    fn schedule_preload(self: &Arc<Self>, path: PathBuf, chunk_start: i64, chunk_size: i64) {
        if !self.preload_enabled {
            return;
        }
        let total_samples = match self.metadata_cache.get(&path) {
            Some(m) => m.total_samples,
            None => i64::MAX,
        };

        let next = chunk_start + chunk_size;
        if next < total_samples {
            let key = ChunkKey { path: path.clone(), chunk_start_samples: next, chunk_end_samples: next + chunk_size };
            if !self.chunk_cache.contains(&key) {
                self.spawn_preload(path.clone(), next, chunk_size);
            }
        }

        let prev = (chunk_start - chunk_size).max(0);
        if prev != chunk_start {
            let key = ChunkKey { path: path.clone(), chunk_start_samples: prev, chunk_end_samples: prev + chunk_size };
            if !self.chunk_cache.contains(&key) {
                self.spawn_preload(path, prev, chunk_size);
            }
        }
    }

    fn spawn_preload(self: &Arc<Self>, path: PathBuf, chunk_start: i64, chunk_size: i64) {
        let core = self.clone();
        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || core.read_chunk_raw(&path, chunk_start, chunk_size)).await;
            match result {
                Ok(Err(e)) => tracing::warn!(error = %e, "preload failed"),
                Err(e) => tracing::warn!(error = %e, "preload task panicked"),
                Ok(Ok(_)) => {}
            }
        });
    }

    pub fn check_cached(&self, path: &Path, chunk_start: i64, chunk_end: i64) -> bool {
        let Ok(path) = self.enforce_allowlist(path) else { return false };
        self.chunk_cache.contains(&ChunkKey {
            path,
            chunk_start_samples: chunk_start,
            chunk_end_samples: chunk_end,
        })
    }

    pub fn invalidate(&self, path: &Path) -> CoreResult<()> {
        let path = self.enforce_allowlist(path)?;
        self.metadata_cache.invalidate(&path);
        self.chunk_cache.invalidate_path(&path);
        self.handle_pool.invalidate(&path);
        Ok(())
    }

    pub fn clear_all(&self) {
        self.metadata_cache.clear();
        self.chunk_cache.clear();
    }

    /// Closes every open handle and stops the sweeper (spec §5 "Shutdown
    /// sets a shutdown flag that the handle-pool sweeper observes ... it
    /// then closes every handle").
    pub fn shutdown(&self) {
        self.handle_pool.close_all();
    }

    pub fn select_channels(&self, path: &Path, max_channels: usize) -> CoreResult<Vec<usize>> {
        let path = self.enforce_allowlist(path)?;
        channel_selector::select_channels(&self.handle_pool, &path, max_channels)
    }

    /// Runs the full DDA pipeline (spec §4.G). Only a path outside the
    /// allowlist is raised as a `CoreError` (spec §6 "hard precondition to
    /// §4.E and §4.G"); every other failure — including a nonexistent file,
    /// a corrupt header, or channel-selection failure — is captured into a
    /// `DDAResult` value instead of propagating, per spec §7 "the DDA path
    /// never raises" and invariant 7 ("for ALL inputs ... returns a DDAResult
    /// value").
    pub async fn run_dda(
        &self,
        path: &Path,
        channels: Option<Vec<usize>>,
        cpu_time: bool,
    ) -> CoreResult<DDAResult> {
        let path = self.resolve_under_allowlist(path)?;

        let metadata = match self.get_metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                let mut result =
                    DDAResult::failure(DdaErrorKind::DdaComputationError, e.to_string());
                result.file_path = path;
                return Ok(result);
            }
        };
        let bounds = Some(DdaRunner::compute_bounds(metadata.total_samples));

        let channels = match channels {
            Some(c) => Some(c),
            None => match channel_selector::select_channels(&self.handle_pool, &path, 5) {
                Ok(c) => Some(c),
                Err(e) => {
                    let mut result =
                        DDAResult::failure(DdaErrorKind::DdaComputationError, e.to_string());
                    result.file_path = path;
                    return Ok(result);
                }
            },
        };

        let invocation = DDAInvocation { file_path: path, channels, bounds, cpu_time };
        Ok(self.dda_runner.run(&invocation, metadata.num_signals).await)
    }
}

/// Resolves `.`/`..` components without touching the filesystem, so a path
/// can be allowlist-checked before its existence is known.
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_edf(path: &std::path::Path, num_signals: usize, spr: usize, num_records: usize) {
        let mut buf = Vec::new();
        let header_bytes = 256 + num_signals * 256;
        buf.extend(format!("{:<8}", "0").into_bytes());
        buf.extend(format!("{:<80}", "patient").into_bytes());
        buf.extend(format!("{:<80}", "recording").into_bytes());
        buf.extend(format!("{:<8}", "01.01.20").into_bytes());
        buf.extend(format!("{:<8}", "00.00.00").into_bytes());
        buf.extend(format!("{:<8}", header_bytes).into_bytes());
        buf.extend(vec![b' '; 44]);
        buf.extend(format!("{:<8}", num_records).into_bytes());
        buf.extend(format!("{:<8}", "1").into_bytes());
        buf.extend(format!("{:<4}", num_signals).into_bytes());

        for i in 0..num_signals {
            buf.extend(format!("{:<16}", format!("CH{i}")).into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 80]);
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "uV").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "-100").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "100").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "-32768").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "32767").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 80]);
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", spr).into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 32]);
        }

        for r in 0..num_records {
            for _ in 0..num_signals {
                for s in 0..spr {
                    let val = ((r * spr + s) % 100) as i16;
                    buf.extend(val.to_le_bytes());
                }
            }
        }

        std::fs::File::create(path).unwrap().write_all(&buf).unwrap();
    }

    fn test_core(allowed_root: PathBuf) -> Arc<Core> {
        Core::new(CoreConfig {
            allowed_roots: vec![allowed_root],
            metadata_cache_size: 10,
            metadata_cache_ttl: Duration::from_secs(60),
            chunk_cache_bytes: 10_000_000,
            chunk_cache_max_entries: 200,
            handle_pool_size: 5,
            handle_pool_ttl: Duration::from_secs(180),
            handle_pool_sweep_interval: Duration::from_secs(3600),
            preload_enabled: false,
            dda_binary_path: PathBuf::from("/nonexistent/dda-binary"),
            synthetic_fallback_enabled: false,
        })
    }

    #[tokio::test]
    async fn read_chunk_is_deep_copy_isolated() {
        let dir = std::env::temp_dir().join(format!("orchestrator-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.edf");
        write_test_edf(&path, 1, 100, 5);

        let core = test_core(dir.clone());
        let opts = PreprocessingOptions::default();

        let mut first = core.read_chunk(&path, 0, 100, None, &opts).unwrap();
        first.signals[0].samples[0] = 12345.0;
        let second = core.read_chunk(&path, 0, 100, None, &opts).unwrap();
        assert_ne!(second.signals[0].samples[0], 12345.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn read_chunk_caches_raw_only_across_preprocessing_options() {
        let dir = std::env::temp_dir().join(format!("orchestrator-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("b.edf");
        write_test_edf(&path, 1, 100, 5);

        let core = test_core(dir.clone());
        let raw = PreprocessingOptions::default();
        let mut zscore = PreprocessingOptions::default();
        zscore.normalization = crate::core::preprocessing::NormalizationMode::Zscore;

        core.read_chunk(&path, 0, 500, None, &raw).unwrap();
        assert_eq!(core.cache_stats().chunk_entries, 1);

        let processed = core.read_chunk(&path, 0, 500, None, &zscore).unwrap();
        assert_eq!(core.cache_stats().chunk_entries, 1);

        let n = processed.signals[0].samples.len() as f64;
        let mean = processed.signals[0].samples.iter().sum::<f64>() / n;
        assert!(mean.abs() < 1e-6);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_outside_allowlist_is_rejected() {
        let dir = std::env::temp_dir().join(format!("orchestrator-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let core = test_core(dir.clone());

        let err = core.read_chunk(std::path::Path::new("/etc/passwd"), 0, 100, None, &PreprocessingOptions::default());
        assert!(matches!(err, Err(CoreError::FileNotFound(_)) | Err(CoreError::PathForbidden(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn synthetic_fallback_serves_missing_file_only_when_enabled() {
        let dir = std::env::temp_dir().join(format!("orchestrator-test5-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let disabled = test_core(dir.clone());
        let missing = dir.join("missing.edf");
        assert!(matches!(disabled.get_metadata(&missing), Err(CoreError::FileNotFound(_))));

        let config = CoreConfig {
            allowed_roots: vec![dir.clone()],
            metadata_cache_size: 10,
            metadata_cache_ttl: Duration::from_secs(60),
            chunk_cache_bytes: 10_000_000,
            chunk_cache_max_entries: 200,
            handle_pool_size: 5,
            handle_pool_ttl: Duration::from_secs(180),
            handle_pool_sweep_interval: Duration::from_secs(3600),
            preload_enabled: false,
            dda_binary_path: PathBuf::from("/nonexistent/dda-binary"),
            synthetic_fallback_enabled: true,
        };
        let enabled = Core::new(config);
        let metadata = enabled.get_metadata(&missing).unwrap();
        assert_eq!(metadata.num_signals, 1);
        assert_eq!(metadata.signal_labels, vec!["SYNTH".to_string()]);

        let chunk = enabled.read_chunk(&missing, 0, 100, None, &PreprocessingOptions::default()).unwrap();
        assert_eq!(chunk.signals[0].samples.len(), 100);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn run_dda_never_raises_for_a_missing_file() {
        let dir = std::env::temp_dir().join(format!("orchestrator-test4-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let core = test_core(dir.clone());

        let result = core.run_dda(&dir.join("missing.edf"), Some(vec![0]), false).await.unwrap();
        assert!(!result.is_success());
        assert!(result.q_matrix.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
