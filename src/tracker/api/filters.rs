use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{Permission, SavedFilter};

use super::{ApiJson, ApiQuery, ApiResult, SharedState};
use crate::errors::{TrackerError, TrackerResult};
use crate::tracker::auth::Principal;
use crate::tracker::db::{FilterPatch, NewFilter, Page, TrackerDb};

/// Fetch a filter the caller may see: their own, a shared one, or any for admins.
fn visible_filter(db: &TrackerDb, principal: &Principal, id: i64) -> TrackerResult<SavedFilter> {
    let filter = db
        .get_filter(id)?
        .ok_or_else(|| TrackerError::not_found("Filter", id))?;
    if filter.shared || filter.owner_id == principal.user.id || principal.is_admin() {
        Ok(filter)
    } else {
        Err(TrackerError::Forbidden("This filter is private".into()))
    }
}

pub async fn list_filters(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let viewer = principal.user.id;
    let filters = state.db.call(move |db| db.list_filters(Some(viewer))).await?;
    let total = filters.len();
    Ok(Json(ApiResponse::list(filters, total)))
}

pub async fn create_filter(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewFilter>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let owner = principal.user.id;
    let filter = state
        .db
        .call(move |db| db.create_filter(owner, req))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(filter))))
}

pub async fn get_filter(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let filter = state
        .db
        .call(move |db| visible_filter(db, &principal, id))
        .await?;
    Ok(Json(ApiResponse::ok(filter)))
}

pub async fn update_filter(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<FilterPatch>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let filter = state
        .db
        .call(move |db| {
            let existing = visible_filter(db, &principal, id)?;
            principal.require_owner_or_admin(Some(existing.owner_id))?;
            db.update_filter(id, patch)?
                .ok_or_else(|| TrackerError::not_found("Filter", id))
        })
        .await?;
    Ok(Json(ApiResponse::ok(filter)))
}

pub async fn delete_filter(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    state
        .db
        .call(move |db| {
            let existing = visible_filter(db, &principal, id)?;
            principal.require_owner_or_admin(Some(existing.owner_id))?;
            db.delete_filter(id)
        })
        .await?;
    Ok(Json(ApiResponse::done()))
}

pub async fn run_filter(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let (issues, total) = state
        .db
        .call(move |db| {
            visible_filter(db, &principal, id)?;
            db.run_filter(id, page)
        })
        .await?;
    Ok(Json(ApiResponse::list(issues, total)))
}
