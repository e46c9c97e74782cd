/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations. Kept minimal: this crate's
/// only persisted state is user accounts (spec §1's "user CRUD" boundary
/// collaborator) and the DDA history side-store (spec §6, SPEC_FULL §F) —
/// everything else the core touches is process-local and in-memory.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("email already exists: {0}")]
    DuplicateEmail(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
