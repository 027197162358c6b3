use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{Permission, Role, User};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::{self, Principal};
use crate::tracker::db::{NewUser, UserPatch};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

// ── Auth ──────────────────────────────────────────────────────────────

pub async fn login(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let signer = state.signer.clone();
    let result = state
        .db
        .call(move |db| auth::login(db, &signer, &req.email, &req.password))
        .await;
    let (token, expires_at, user) = match result {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("Failed login attempt");
            return Err(e.into());
        }
    };
    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(ApiResponse::ok(LoginResponse {
        token,
        expires_at: expires_at.to_rfc3339(),
        user,
    })))
}

pub async fn me(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    Json(ApiResponse::ok(MeResponse {
        user: principal.user,
        permissions: principal.permissions,
    }))
}

// ── Users ─────────────────────────────────────────────────────────────

pub async fn list_users(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let users = state.db.call(|db| db.list_users()).await?;
    let total = users.len();
    Ok(Json(ApiResponse::list(users, total)))
}

pub async fn get_user(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let user = state
        .db
        .call(move |db| db.get_user(id)?.ok_or_else(|| TrackerError::not_found("User", id)))
        .await?;
    Ok(Json(ApiResponse::ok(user)))
}

pub async fn create_user(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Admin)?;
    auth::validate_password(&req.password)?;
    let user = state
        .db
        .call(move |db| {
            db.create_user(NewUser {
                name: req.name,
                email: req.email,
                password_hash: auth::hash_password(&req.password),
                role: req.role.unwrap_or_default(),
            })
        })
        .await?;
    tracing::info!(user_id = user.id, role = %user.role, "User created");
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

/// Admins may change anything. Other users may change their own name,
/// email and password. Changing your own email or password needs a
/// session login; API tokens cannot do it.
pub async fn update_user(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes_credentials = req.email.is_some() || req.password.is_some();
    if principal.token_id.is_some() && principal.user.id == id && changes_credentials {
        return Err(ApiError::Forbidden(
            "Email and password changes require a session login".into(),
        ));
    }
    if !principal.is_admin() {
        if principal.user.id != id {
            return Err(ApiError::Forbidden("You may only update your own account".into()));
        }
        if req.role.is_some() || req.active.is_some() {
            return Err(ApiError::Forbidden(
                "Only an admin may change role or active status".into(),
            ));
        }
    }
    if let Some(password) = &req.password {
        auth::validate_password(password)?;
    }
    let user = state
        .db
        .call(move |db| {
            let patch = UserPatch {
                name: req.name,
                email: req.email,
                role: req.role,
                active: req.active,
                password_hash: req.password.as_deref().map(auth::hash_password),
            };
            db.update_user(id, patch)?
                .ok_or_else(|| TrackerError::not_found("User", id))
        })
        .await?;
    Ok(Json(ApiResponse::ok(user)))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Admin)?;
    if principal.user.id == id {
        return Err(ApiError::BadRequest("You cannot delete your own account".into()));
    }
    let deleted = state.db.call(move |db| db.delete_user(id)).await?;
    if !deleted {
        return Err(TrackerError::not_found("User", id).into());
    }
    tracing::info!(user_id = id, "User deleted");
    Ok(Json(ApiResponse::done()))
}
