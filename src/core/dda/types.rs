use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error taxonomy returned as a `DDAResult` field, never raised (spec §4.G /
/// §7: "the DDA path never raises"). Mirrors the five Python original
/// error strings exactly (`DDA_BINARY_INVALID`, `DDA_COMMAND_NO_CHANNELS`,
/// `DDA_COMMAND_INVALID`, `DDA_COMPUTATION_FAILED`, `DDA_COMPUTATION_ERROR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DdaErrorKind {
    DdaBinaryInvalid,
    DdaCommandNoChannels,
    DdaCommandInvalid,
    DdaComputationFailed,
    DdaComputationError,
}

impl DdaErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DdaErrorKind::DdaBinaryInvalid => "DDA_BINARY_INVALID",
            DdaErrorKind::DdaCommandNoChannels => "DDA_COMMAND_NO_CHANNELS",
            DdaErrorKind::DdaCommandInvalid => "DDA_COMMAND_INVALID",
            DdaErrorKind::DdaComputationFailed => "DDA_COMPUTATION_FAILED",
            DdaErrorKind::DdaComputationError => "DDA_COMPUTATION_ERROR",
        }
    }
}

/// One DDA request (spec §4.G): a file, a channel subset, and an optional
/// sample-index bound. `channels` is `None` when the caller wants
/// automatic selection (delegated to `channel_selector`).
#[derive(Debug, Clone)]
pub struct DDAInvocation {
    pub file_path: PathBuf,
    pub channels: Option<Vec<usize>>,
    pub bounds: Option<(i64, i64)>,
    /// Appends `-CPUtime` to the argv (spec §3/§4.G) to have the engine
    /// report its own CPU time alongside the Q matrix.
    pub cpu_time: bool,
}

/// Outcome of a DDA run. Exactly one of `q_matrix`/`error_kind` is set —
/// success never carries an error kind, and a failed run still returns
/// `Ok(DDAResult)` from `DdaRunner::run`, never an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DDAResult {
    /// The input file this result was computed from (spec §3 `DDAResult.file_path`).
    pub file_path: PathBuf,
    pub channels: Vec<String>,
    /// `[channel][timepoint]`, already transposed from the binary's
    /// `[timepoint][channel]` text layout.
    pub q_matrix: Option<Vec<Vec<Option<f64>>>>,
    /// Free-form key/value metadata (spec §3 `DDAResult.metadata`), e.g.
    /// the resolved bounds and whether `-CPUtime` was requested.
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    pub error_kind: Option<DdaErrorKind>,
    pub error_message: Option<String>,
    pub nan_count: usize,
    pub inf_count: usize,
    pub finite_count: usize,
}

impl DDAResult {
    pub fn failure(kind: DdaErrorKind, message: impl Into<String>) -> Self {
        DDAResult {
            file_path: PathBuf::new(),
            channels: Vec::new(),
            q_matrix: None,
            metadata: std::collections::HashMap::new(),
            error_kind: Some(kind),
            error_message: Some(message.into()),
            nan_count: 0,
            inf_count: 0,
            finite_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}
