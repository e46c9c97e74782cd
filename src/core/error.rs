use std::path::PathBuf;

/// Error taxonomy for the EDF data access subsystem (spec §7).
///
/// `ChannelReadDegraded` and `PreloadFailed` are produced for logging only —
/// callers of `Orchestrator::read_chunk` never see them as an `Err`; a
/// degraded channel still yields a successful read (spec §4.A), and a
/// failed preload is swallowed entirely (spec §5 "Cancellation").
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("path not under any allowed root: {0}")]
    PathForbidden(PathBuf),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("corrupt EDF header in {path}: {reason}")]
    CorruptHeader { path: PathBuf, reason: String },

    #[error("channel {label} read degraded to empty in {path}")]
    ChannelReadDegraded { path: PathBuf, label: String },

    #[error("handle for {0} failed liveness probe")]
    HandleUnusable(PathBuf),

    #[error("preload of {path} failed: {reason}")]
    PreloadFailed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
