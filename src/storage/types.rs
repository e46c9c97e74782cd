use chrono::{DateTime, Utc};
use uuid::Uuid;

/// User identifier as used by the in-memory session manager: the
/// account's email address (spec SPEC_FULL §D — bearer-token gate keyed
/// by the logged-in account, not a synthetic numeric id).
pub type UserId = String;

/// A session handed back to a client after login (spec SPEC_FULL §D).
/// Carries no encryption material — the teacher's end-to-end
/// application-layer encryption has no counterpart in spec.md and was
/// dropped; this is solely the bearer-token gate.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
