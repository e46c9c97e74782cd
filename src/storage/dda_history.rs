//! Generic keyed side-store for DDA run history (spec §6 `GET/POST
//! /dda/history[/:id]`, spec §9 Open Question 4, SPEC_FULL §F).
//!
//! This is explicitly NOT part of the core (spec §1 non-goal: "replicating
//! the analysis-history storage scheme verbatim"). It persists a sanitized
//! `DDAResult` per analysis, keyed by a server-generated id and the owning
//! user, following the teacher's `postgres.rs` table-init-if-not-exists +
//! parameterized-query CRUD idiom.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::traits::{StorageError, StorageResult};

/// One persisted DDA run (spec §3 `DDAResult`, sanitized — non-finite Q
/// entries already replaced by `null` before this record is built).
#[derive(Debug, Clone)]
pub struct DdaHistoryRecord {
    pub id: Uuid,
    pub user_id: String,
    pub file_path: String,
    pub channels: Vec<String>,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New-record payload (id/created_at assigned by the store).
#[derive(Debug)]
pub struct NewDdaHistoryRecord {
    pub user_id: String,
    pub file_path: String,
    pub channels: Vec<String>,
    pub result: serde_json::Value,
}

#[async_trait]
pub trait DdaHistoryStore: Send + Sync {
    /// Persist a completed (or failed) DDA run.
    async fn create(&self, record: NewDdaHistoryRecord) -> StorageResult<DdaHistoryRecord>;

    /// Fetch a single run by id.
    async fn get(&self, id: Uuid) -> StorageResult<DdaHistoryRecord>;

    /// List runs owned by a user, most recent first.
    async fn list_for_user(&self, user_id: &str, limit: i64) -> StorageResult<Vec<DdaHistoryRecord>>;
}

pub struct PostgresDdaHistoryStore {
    pool: PgPool,
}

impl PostgresDdaHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dda_history (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                channels JSONB NOT NULL,
                result JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dda_history_user
                ON dda_history(user_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DdaHistoryStore for PostgresDdaHistoryStore {
    async fn create(&self, record: NewDdaHistoryRecord) -> StorageResult<DdaHistoryRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let channels_json = serde_json::to_value(&record.channels)?;

        sqlx::query(
            r#"
            INSERT INTO dda_history (id, user_id, file_path, channels, result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&record.user_id)
        .bind(&record.file_path)
        .bind(&channels_json)
        .bind(&record.result)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(DdaHistoryRecord {
            id,
            user_id: record.user_id,
            file_path: record.file_path,
            channels: record.channels,
            result: record.result,
            created_at: now,
        })
    }

    async fn get(&self, id: Uuid) -> StorageResult<DdaHistoryRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, file_path, channels, result, created_at
            FROM dda_history
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Ok(row_to_record(row)?)
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> StorageResult<Vec<DdaHistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, file_path, channels, result, created_at
            FROM dda_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<DdaHistoryRecord> {
    let channels: Vec<String> = serde_json::from_value(row.get("channels"))?;
    Ok(DdaHistoryRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        file_path: row.get("file_path"),
        channels,
        result: row.get("result"),
        created_at: row.get("created_at"),
    })
}
