//! `/dda/*` HTTP surface (spec §6): runs the full DDA pipeline via
//! `core::Core::run_dda`, enumerates the (currently single) supported
//! algorithmic variant, and delegates history CRUD to the generic
//! `storage::dda_history` side-store, which `core::*` never touches
//! (SPEC_FULL §F).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::dda::DDAResult;
use crate::core::CoreError;
use crate::handlers::edf::ErrorResponse;
use crate::state::ServerState;
use crate::storage::{NewDdaHistoryRecord, StorageError};

fn current_user(state: &ServerState, auth_header: &Option<TypedHeader<Authorization<Bearer>>>) -> String {
    auth_header
        .as_ref()
        .and_then(|TypedHeader(Authorization(bearer))| {
            state.auth_state.session_manager.validate_token(bearer.token()).map(|(_, user_id)| user_id)
        })
        .unwrap_or_else(|| "anonymous".to_string())
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            StorageError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            StorageError::DuplicateEmail(_) => (StatusCode::CONFLICT, "DUPLICATE_EMAIL"),
            StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            StorageError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            StorageError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
        };
        (status, Json(ErrorResponse { error: self.to_string(), code: code.to_string() })).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RunDdaRequest {
    pub file_path: String,
    pub channels: Option<Vec<usize>>,
    /// Persist the result to `dda_history` under the caller's identity (default true).
    #[serde(default = "default_true")]
    pub save_history: bool,
    /// Passes `-CPUtime` to the engine (spec §3 `DDAInvocation.cpu_time`).
    #[serde(default)]
    pub cpu_time: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /dda`: the full §4.G pipeline. Never returns an HTTP error for a
/// failed analysis — a failed run is a `200` body with `error_kind` set,
/// per spec §7 "the DDA path never raises".
pub async fn run_dda(
    State(state): State<Arc<ServerState>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<RunDdaRequest>,
) -> Result<Json<DDAResult>, CoreError> {
    let path = PathBuf::from(&request.file_path);
    let result = state.core.run_dda(&path, request.channels, request.cpu_time).await?;

    if request.save_history {
        let user_id = current_user(&state, &auth_header);
        let result_json = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        let record = NewDdaHistoryRecord {
            user_id,
            file_path: request.file_path,
            channels: result.channels.clone(),
            result: result_json,
        };
        if let Err(e) = state.dda_history_store.create(record).await {
            tracing::warn!(error = %e, "failed to persist DDA history record");
        }
    }

    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct VariantInfo {
    pub abbreviation: &'static str,
    pub name: &'static str,
    pub active: bool,
}

/// `GET /dda/variants`: static enumeration. Only `ST` (single-timeseries)
/// is wired into `core::dda::runner`'s fixed `-SELECT` mask today.
pub async fn variants() -> Json<Vec<VariantInfo>> {
    Json(vec![
        VariantInfo { abbreviation: "ST", name: "Single Timeseries", active: true },
        VariantInfo { abbreviation: "CT", name: "Cross Timeseries", active: false },
        VariantInfo { abbreviation: "CD", name: "Cross Dynamical", active: false },
        VariantInfo { abbreviation: "DE", name: "Dynamical Ergodicity", active: false },
    ])
}

#[derive(Debug, Deserialize)]
pub struct HistoryListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryRecordResponse {
    pub id: Uuid,
    pub user_id: String,
    pub file_path: String,
    pub channels: Vec<String>,
    pub result: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::storage::DdaHistoryRecord> for HistoryRecordResponse {
    fn from(r: crate::storage::DdaHistoryRecord) -> Self {
        HistoryRecordResponse {
            id: r.id,
            user_id: r.user_id,
            file_path: r.file_path,
            channels: r.channels,
            result: r.result,
            created_at: r.created_at,
        }
    }
}

/// `GET /dda/history`: the caller's own run history, most recent first.
pub async fn list_history(
    State(state): State<Arc<ServerState>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<HistoryListQuery>,
) -> Result<Json<Vec<HistoryRecordResponse>>, StorageError> {
    let user_id = current_user(&state, &auth_header);
    let limit = query.limit.unwrap_or(50);
    let records = state.dda_history_store.list_for_user(&user_id, limit).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
pub struct SaveHistoryRequest {
    pub file_path: String,
    pub channels: Vec<String>,
    pub result: serde_json::Value,
}

/// `POST /dda/history`: persists an already-computed result (e.g. a client
/// re-submitting a locally-run analysis) under the caller's identity.
pub async fn create_history(
    State(state): State<Arc<ServerState>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<SaveHistoryRequest>,
) -> Result<Json<HistoryRecordResponse>, StorageError> {
    let user_id = current_user(&state, &auth_header);
    let record = state
        .dda_history_store
        .create(NewDdaHistoryRecord {
            user_id,
            file_path: request.file_path,
            channels: request.channels,
            result: request.result,
        })
        .await?;
    Ok(Json(record.into()))
}

/// `GET /dda/history/:id`.
pub async fn get_history(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryRecordResponse>, StorageError> {
    let record = state.dda_history_store.get(id).await?;
    Ok(Json(record.into()))
}
