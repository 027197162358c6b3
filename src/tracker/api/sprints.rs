use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{Permission, Sprint, SprintStatus};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiQuery, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::Principal;
use crate::tracker::db::{NewSprint, SprintCompletion, SprintPatch};
use crate::tracker::ws::{WsMessage, broadcast_message};

#[derive(Debug, Default, Deserialize)]
pub struct SprintQuery {
    pub project_id: Option<i64>,
    pub status: Option<SprintStatus>,
}

#[derive(Debug, Serialize)]
pub struct CompletedSprint {
    pub sprint: Sprint,
    pub moved_issues: usize,
}

pub async fn list_sprints(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<SprintQuery>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let sprints = state
        .db
        .call(move |db| db.list_sprints(query.project_id, query.status))
        .await?;
    let total = sprints.len();
    Ok(Json(ApiResponse::list(sprints, total)))
}

pub async fn create_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewSprint>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SprintsWrite)?;
    let sprint = state.db.call(move |db| db.create_sprint(req)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(sprint))))
}

pub async fn get_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let sprint = state
        .db
        .call(move |db| db.get_sprint(id)?.ok_or_else(|| TrackerError::not_found("Sprint", id)))
        .await?;
    Ok(Json(ApiResponse::ok(sprint)))
}

pub async fn update_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<SprintPatch>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SprintsWrite)?;
    let sprint = state
        .db
        .call(move |db| {
            db.update_sprint(id, patch)?
                .ok_or_else(|| TrackerError::not_found("Sprint", id))
        })
        .await?;
    Ok(Json(ApiResponse::ok(sprint)))
}

pub async fn delete_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SprintsWrite)?;
    let deleted = state.db.call(move |db| db.delete_sprint(id)).await?;
    if !deleted {
        return Err(TrackerError::not_found("Sprint", id).into());
    }
    Ok(Json(ApiResponse::done()))
}

pub async fn start_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SprintsWrite)?;
    let sprint = state.db.call(move |db| db.start_sprint(id)).await?;
    tracing::info!(sprint_id = id, project_id = sprint.project_id, "Sprint started");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::SprintStarted {
            sprint: sprint.clone(),
        },
    );
    Ok(Json(ApiResponse::ok(sprint)))
}

pub async fn complete_sprint(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SprintsWrite)?;
    // The body is optional; empty means "move leftovers to the backlog".
    let completion: SprintCompletion = if body.is_empty() {
        SprintCompletion::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };
    let (sprint, moved_issues) = state
        .db
        .call(move |db| db.complete_sprint(id, completion))
        .await?;
    tracing::info!(sprint_id = id, moved_issues, "Sprint completed");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::SprintCompleted {
            sprint: sprint.clone(),
            moved_issues,
        },
    );
    Ok(Json(ApiResponse::ok(CompletedSprint {
        sprint,
        moved_issues,
    })))
}

pub async fn sprint_report(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let report = state.db.call(move |db| db.sprint_report(id)).await?;
    Ok(Json(ApiResponse::ok(report)))
}
