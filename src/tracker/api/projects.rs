use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{Permission, Transition};
use serde::Deserialize;

use super::{ApiJson, ApiQuery, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::Principal;
use crate::tracker::db::{NewProject, ProjectPatch};
use crate::tracker::ws::{WsMessage, broadcast_message};

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    pub sprint_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowUpdate {
    pub statuses: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

pub async fn list_projects(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let projects = state.db.call(|db| db.list_projects()).await?;
    let total = projects.len();
    Ok(Json(ApiResponse::list(projects, total)))
}

pub async fn create_project(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewProject>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::ProjectsWrite)?;
    let project = state.db.call(move |db| db.create_project(req)).await?;
    tracing::info!(project_id = project.id, key = %project.key, "Project created");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectCreated {
            project: project.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(project))))
}

pub async fn get_project(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let project = state.db.call(move |db| db.require_project(id)).await?;
    Ok(Json(ApiResponse::ok(project)))
}

pub async fn update_project(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<ProjectPatch>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::ProjectsWrite)?;
    let project = state
        .db
        .call(move |db| {
            db.update_project(id, patch)?
                .ok_or_else(|| TrackerError::not_found("Project", id))
        })
        .await?;
    Ok(Json(ApiResponse::ok(project)))
}

pub async fn delete_project(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::ProjectsWrite)?;
    let deleted = state.db.call(move |db| db.delete_project(id)).await?;
    if !deleted {
        return Err(TrackerError::not_found("Project", id).into());
    }
    tracing::info!(project_id = id, "Project deleted");
    broadcast_message(&state.ws_tx, &WsMessage::ProjectDeleted { project_id: id });
    Ok(Json(ApiResponse::done()))
}

pub async fn get_board(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiQuery(query): ApiQuery<BoardQuery>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let board = state
        .db
        .call(move |db| db.get_board(id, query.sprint_id))
        .await?;
    Ok(Json(ApiResponse::ok(board)))
}

pub async fn get_workflow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let workflow = state.db.call(move |db| db.require_workflow(id)).await?;
    Ok(Json(ApiResponse::ok(workflow)))
}

pub async fn put_workflow(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<WorkflowUpdate>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Admin)?;
    let (workflow, remapped) = state
        .db
        .call(move |db| db.set_workflow(id, req.statuses, req.transitions))
        .await?;
    tracing::info!(project_id = id, remapped, "Workflow replaced");
    Ok(Json(ApiResponse::ok(workflow)))
}

pub async fn project_report(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let report = state.db.call(move |db| db.project_report(id)).await?;
    Ok(Json(ApiResponse::ok(report)))
}
