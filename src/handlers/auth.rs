use axum::{extract::State, http::StatusCode, Json};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::verify_password;
use crate::state::ServerState;
use crate::storage::StorageError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// User identifier (the account's email address).
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub user_id: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub valid: bool,
    pub user_id: Option<String>,
    pub expires_in_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error(status: StatusCode, code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message.to_string(), code: code.to_string() }))
}

/// Login endpoint: exchanges a registered account's password for a bearer
/// session token (SPEC_FULL §D — the gate, not a confidentiality layer).
pub async fn login(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = match state.user_store.get_user_by_email(&request.user_id).await {
        Ok(user) => user,
        Err(StorageError::UserNotFound(_)) => {
            warn!("Login attempt for unknown user: {}", request.user_id);
            return Err(error(StatusCode::UNAUTHORIZED, "AUTH_FAILED", "Invalid email or password"));
        }
        Err(e) => {
            warn!("Database error during login: {}", e);
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal error"));
        }
    };

    if !user.is_active {
        warn!("Login attempt for suspended user: {}", request.user_id);
        return Err(error(StatusCode::FORBIDDEN, "ACCOUNT_SUSPENDED", "Account is suspended"));
    }

    match verify_password(&request.password, &user.password_hash) {
        Ok(true) => info!("User {} logged in successfully", user.email),
        Ok(false) => {
            warn!("Invalid password for user: {}", request.user_id);
            return Err(error(StatusCode::UNAUTHORIZED, "AUTH_FAILED", "Invalid email or password"));
        }
        Err(e) => {
            warn!("Password verification error: {:?}", e);
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal error"));
        }
    }

    if let Err(e) = state.user_store.update_last_login(user.id).await {
        warn!("Failed to update last login for user {}: {}", user.email, e);
    }

    let (token, _session) = state.auth_state.session_manager.create_session(user.email.clone());

    Ok(Json(LoginResponse {
        session_token: token,
        user_id: user.email,
        expires_in_seconds: state.config.session_timeout_seconds,
    }))
}

pub async fn logout(State(state): State<Arc<ServerState>>, Json(request): Json<LogoutRequest>) -> StatusCode {
    state.auth_state.session_manager.revoke_session(&request.session_token);
    StatusCode::OK
}

/// Session validation. Uses the Authorization header rather than a query
/// parameter so tokens never land in access logs.
pub async fn validate_session(
    State(state): State<Arc<ServerState>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
) -> Json<SessionResponse> {
    let token = match auth_header {
        Some(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
        None => return Json(SessionResponse { valid: false, user_id: None, expires_in_seconds: None }),
    };

    match state.auth_state.session_manager.validate_token(&token) {
        Some((_, user_id)) => Json(SessionResponse {
            valid: true,
            user_id: Some(user_id),
            expires_in_seconds: Some(state.config.session_timeout_seconds),
        }),
        None => Json(SessionResponse { valid: false, user_id: None, expires_in_seconds: None }),
    }
}
