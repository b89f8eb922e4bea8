//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for staff login, logout, identity lookup and
//! admin-managed account creation.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use nodues_core::{FacultyId, PortError, StaffIdentity};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{middleware::session_id, rest::require_admin, state::AppState};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub email: String,
    pub password: String,
    /// Links the account to a faculty document; omitted for office staff.
    pub faculty_id: Option<FacultyId>,
    #[serde(default)]
    pub is_admin: bool,
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Hashes a password with argon2 and a fresh salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn session_cookie(auth_session_id: &str, ttl: Duration) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        ttl.num_seconds()
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/login - Login with an existing staff account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = StaffIdentity),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Get the account by email
    let creds = state
        .accounts
        .get_account_by_email(req.email.trim())
        .await
        .map_err(|e| {
            info!("Login failed for {}: {}", req.email, e);
            (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string())
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err((StatusCode::UNAUTHORIZED, "Invalid email or password".to_string()));
    }

    // 3. Create the auth session
    let auth_session_id = Uuid::new_v4().to_string();
    let ttl = Duration::days(state.config.session_ttl_days);

    state
        .accounts
        .create_auth_session(&auth_session_id, creds.identity.user_id, Utc::now() + ttl)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&auth_session_id, ttl))],
        Json(creds.identity),
    ))
}

/// POST /auth/logout - Logout and invalidate the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let auth_session_id =
        session_id(&headers).ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .accounts
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie("", Duration::zero()))],
    ))
}

/// GET /auth/me - The identity behind the current session
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = StaffIdentity),
        (status = 401, description = "No active session")
    )
)]
pub async fn me_handler(Extension(identity): Extension<StaffIdentity>) -> Json<StaffIdentity> {
    Json(identity)
}

/// POST /auth/accounts - Create a staff account (admin only)
#[utoipa::path(
    post,
    path = "/auth/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = StaffIdentity),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Not an administrator"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<StaffIdentity>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_admin(&actor)?;

    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Email and password are required".to_string()));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        error!("Failed to hash password: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
    })?;

    let identity = state
        .accounts
        .create_account(email, &password_hash, req.faculty_id.as_ref(), req.is_admin)
        .await
        .map_err(|e| match e {
            PortError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            other => {
                error!("Failed to create account: {:?}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account".to_string())
            }
        })?;

    info!(email = %identity.email, admin = identity.is_admin, "Staff account created by {}", actor.email);
    Ok((StatusCode::CREATED, Json(identity)))
}
