use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{ApiToken, Permission};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::{self, Principal};

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    pub permissions: Option<Vec<Permission>>,
    pub expires_in_days: Option<u32>,
}

/// The plaintext token is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreatedToken {
    pub token: String,
    pub record: ApiToken,
}

pub async fn list_tokens(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let owner = (!principal.is_admin()).then_some(principal.user.id);
    let tokens = state.db.call(move |db| db.list_api_tokens(owner)).await?;
    let total = tokens.len();
    Ok(Json(ApiResponse::list(tokens, total)))
}

pub async fn create_token(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<CreateTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::TokensWrite)?;
    let permissions = match req.permissions {
        Some(requested) => {
            if let Some(extra) = requested.iter().find(|p| !principal.has(**p)) {
                return Err(ApiError::Forbidden(format!(
                    "Cannot grant permission you do not hold: {}",
                    extra
                )));
            }
            let mut requested = requested;
            requested.sort();
            requested.dedup();
            requested
        }
        None => principal.permissions.clone(),
    };
    let (plaintext, new) =
        auth::generate_api_token(principal.user.id, &req.name, permissions, req.expires_in_days)?;
    let record = state.db.call(move |db| db.create_api_token(new)).await?;
    tracing::info!(token_id = record.id, user_id = record.user_id, "API token created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(CreatedToken {
            token: plaintext,
            record,
        })),
    ))
}

pub async fn delete_token(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::TokensWrite)?;
    state
        .db
        .call(move |db| {
            let token = db
                .get_api_token(id)?
                .ok_or_else(|| TrackerError::not_found("ApiToken", id))?;
            principal.require_owner_or_admin(Some(token.user_id))?;
            db.delete_api_token(id)
        })
        .await?;
    tracing::info!(token_id = id, "API token revoked");
    Ok(Json(ApiResponse::done()))
}
