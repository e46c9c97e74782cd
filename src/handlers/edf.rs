//! Thin HTTP surface over `core::Core` (spec §6 endpoint table). No domain
//! logic lives here: a handler resolves its params, calls `Core`, and
//! serializes the result.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::edf::{EdfChunk, FileMetadata};
use crate::core::preprocessing::PreprocessingOptions;
use crate::core::{CacheStats, CoreError};
use crate::state::ServerState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CoreError::PathForbidden(_) => (StatusCode::FORBIDDEN, "PATH_FORBIDDEN"),
            CoreError::FileNotFound(_) => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
            CoreError::CorruptHeader { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "CORRUPT_HEADER"),
            CoreError::ChannelReadDegraded { .. } => (StatusCode::OK, "CHANNEL_READ_DEGRADED"),
            CoreError::HandleUnusable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "HANDLE_UNUSABLE"),
            CoreError::PreloadFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PRELOAD_FAILED"),
            CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };
        (status, Json(ErrorResponse { error: self.to_string(), code: code.to_string() })).into_response()
    }
}

fn parse_channels(raw: &Option<String>) -> Option<Vec<usize>> {
    raw.as_ref().map(|s| {
        s.split(',')
            .filter_map(|p| p.trim().parse::<usize>().ok())
            .collect()
    })
}

fn parse_preprocessing(raw: &Option<String>) -> Result<PreprocessingOptions, (StatusCode, Json<ErrorResponse>)> {
    match raw {
        None => Ok(PreprocessingOptions::default()),
        Some(s) => serde_json::from_str(s).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("invalid preprocessing_options: {e}"),
                    code: "INVALID_PREPROCESSING_OPTIONS".to_string(),
                }),
            )
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub file_path: String,
    pub chunk_size_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub metadata: FileMetadataResponse,
    pub chunk_size_samples: i64,
    pub total_chunks: i64,
}

#[derive(Debug, Serialize)]
pub struct FileMetadataResponse {
    pub total_samples: i64,
    pub num_signals: usize,
    pub signal_labels: Vec<String>,
    pub sampling_frequencies: Vec<f64>,
    pub file_duration_seconds: f64,
}

impl From<&FileMetadata> for FileMetadataResponse {
    fn from(m: &FileMetadata) -> Self {
        FileMetadataResponse {
            total_samples: m.total_samples,
            num_signals: m.num_signals,
            signal_labels: m.signal_labels.clone(),
            sampling_frequencies: m.sampling_frequencies.clone(),
            file_duration_seconds: m.file_duration_seconds,
        }
    }
}

/// `GET /edf/info`: FileMetadata plus the chunk arithmetic derived from a
/// requested chunk duration (assumed against the first channel's rate).
pub async fn info(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<InfoResponse>, CoreError> {
    let metadata = state.core.get_metadata(&PathBuf::from(&query.file_path))?;

    let sampling_rate = metadata.sampling_frequencies.first().copied().unwrap_or(256.0);
    let chunk_size_samples = match query.chunk_size_seconds {
        Some(seconds) if seconds > 0.0 => (seconds * sampling_rate).round() as i64,
        _ => crate::core::edf::DEFAULT_CHUNK_SIZE,
    }
    .max(1);
    let total_chunks = (metadata.total_samples + chunk_size_samples - 1) / chunk_size_samples;

    Ok(Json(InfoResponse {
        metadata: FileMetadataResponse::from(metadata.as_ref()),
        chunk_size_samples,
        total_chunks,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub file_path: String,
    pub chunk_start: i64,
    pub chunk_size: i64,
    pub channels: Option<String>,
    pub preprocessing_options: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub label: String,
    pub samples: Vec<f64>,
    pub sampling_frequency_hz: f64,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i64,
    pub digital_max: i64,
}

#[derive(Debug, Serialize)]
pub struct EdfChunkResponse {
    pub labels: Vec<String>,
    pub signals: Vec<SignalResponse>,
    pub chunk_start_samples: i64,
    pub chunk_end_samples: i64,
    pub chunk_size_samples: i64,
    pub start_datetime: chrono::DateTime<chrono::Utc>,
}

impl From<EdfChunk> for EdfChunkResponse {
    fn from(chunk: EdfChunk) -> Self {
        EdfChunkResponse {
            labels: chunk.labels,
            signals: chunk
                .signals
                .into_iter()
                .map(|s| SignalResponse {
                    label: s.label,
                    samples: s.samples,
                    sampling_frequency_hz: s.sampling_frequency_hz,
                    physical_min: s.physical_min,
                    physical_max: s.physical_max,
                    digital_min: s.digital_min,
                    digital_max: s.digital_max,
                })
                .collect(),
            chunk_start_samples: chunk.chunk_start_samples,
            chunk_end_samples: chunk.chunk_end_samples,
            chunk_size_samples: chunk.chunk_size_samples,
            start_datetime: chunk.start_datetime,
        }
    }
}

/// `GET /edf/data`: a windowed, optionally-preprocessed, optionally
/// channel-subset view of a file (spec §4.E / §4.A).
pub async fn data(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DataQuery>,
) -> Result<Json<EdfChunkResponse>, Response> {
    let options = parse_preprocessing(&query.preprocessing_options).map_err(|e| e.into_response())?;
    let selected = parse_channels(&query.channels);
    let path = PathBuf::from(&query.file_path);

    let chunk = state
        .core
        .read_chunk(&path, query.chunk_start, query.chunk_size, selected.as_deref(), &options)
        .map_err(|e| e.into_response())?;

    Ok(Json(chunk.into()))
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub metadata_entries: usize,
    pub metadata_capacity: usize,
    pub chunk_entries: usize,
    pub chunk_capacity_entries: usize,
    pub chunk_bytes: usize,
    pub chunk_capacity_bytes: usize,
    pub handle_pool_entries: usize,
    pub handle_pool_capacity: usize,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(s: CacheStats) -> Self {
        CacheStatsResponse {
            metadata_entries: s.metadata_entries,
            metadata_capacity: s.metadata_capacity,
            chunk_entries: s.chunk_entries,
            chunk_capacity_entries: s.chunk_capacity_entries,
            chunk_bytes: s.chunk_bytes,
            chunk_capacity_bytes: s.chunk_capacity_bytes,
            handle_pool_entries: s.handle_pool_entries,
            handle_pool_capacity: s.handle_pool_capacity,
        }
    }
}

/// `GET /edf/cache/stats`.
pub async fn cache_stats(State(state): State<Arc<ServerState>>) -> Json<CacheStatsResponse> {
    Json(state.core.cache_stats().into())
}

#[derive(Debug, Deserialize)]
pub struct CacheCheckQuery {
    pub file_path: String,
    pub chunk_start: i64,
    pub chunk_end: i64,
}

#[derive(Debug, Serialize)]
pub struct CacheCheckResponse {
    pub cached: bool,
}

/// `GET /edf/cache/check`.
pub async fn cache_check(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CacheCheckQuery>,
) -> Json<CacheCheckResponse> {
    let cached = state.core.check_cached(&PathBuf::from(&query.file_path), query.chunk_start, query.chunk_end);
    Json(CacheCheckResponse { cached })
}

#[derive(Debug, Deserialize)]
pub struct CacheClearQuery {
    pub file_path: Option<String>,
}

/// `POST /edf/cache/clear`: invalidates one file's entries, or every tier
/// entirely when `file_path` is omitted.
pub async fn cache_clear(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CacheClearQuery>,
) -> Result<StatusCode, CoreError> {
    match query.file_path {
        Some(file_path) => state.core.invalidate(&PathBuf::from(&file_path))?,
        None => state.core.clear_all(),
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CacheWarmupQuery {
    pub file_path: String,
}

/// `POST /edf/cache/warmup`: forces a `FileMetadata` load into the cache.
pub async fn cache_warmup(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CacheWarmupQuery>,
) -> Result<Json<FileMetadataResponse>, CoreError> {
    let metadata = state.core.get_metadata(&PathBuf::from(&query.file_path))?;
    Ok(Json(FileMetadataResponse::from(metadata.as_ref())))
}

#[derive(Debug, Deserialize)]
pub struct DefaultChannelsQuery {
    pub file_path: String,
    pub max_channels: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DefaultChannelsResponse {
    pub channels: Vec<usize>,
}

/// `GET /edf/default_channels` (spec §4.F).
pub async fn default_channels(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DefaultChannelsQuery>,
) -> Result<Json<DefaultChannelsResponse>, CoreError> {
    let max_channels = query.max_channels.unwrap_or(5);
    let channels = state.core.select_channels(&PathBuf::from(&query.file_path), max_channels)?;
    Ok(Json(DefaultChannelsResponse { channels }))
}
