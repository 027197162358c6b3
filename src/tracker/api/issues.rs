use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::{IssueFilter, IssueType, Permission, Priority};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiQuery, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::Principal;
use crate::tracker::db::{IssueMove, IssuePatch, NewIssue, Page};
use crate::tracker::ws::{WsMessage, broadcast_message};

/// Query string for `GET /api/issues`. Kept flat: urlencoded values do not
/// survive `#[serde(flatten)]` for non-string fields.
#[derive(Debug, Default, Deserialize)]
pub struct IssueQuery {
    pub project_id: Option<i64>,
    pub status: Option<String>,
    pub assignee_id: Option<i64>,
    pub sprint_id: Option<i64>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub label: Option<String>,
    pub q: Option<String>,
    pub backlog: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl IssueQuery {
    fn split(self) -> (IssueFilter, Page) {
        (
            IssueFilter {
                project_id: self.project_id,
                status: self.status,
                assignee_id: self.assignee_id,
                sprint_id: self.sprint_id,
                issue_type: self.issue_type,
                priority: self.priority,
                label: self.label,
                q: self.q,
                backlog: self.backlog,
            },
            Page {
                limit: self.limit,
                offset: self.offset,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

pub async fn list_issues(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<IssueQuery>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let (filter, page) = query.split();
    let (issues, total) = state
        .db
        .call(move |db| db.list_issues(&filter, page))
        .await?;
    Ok(Json(ApiResponse::list(issues, total)))
}

pub async fn create_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewIssue>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::IssuesWrite)?;
    let reporter = principal.user.id;
    let issue = state
        .db
        .call(move |db| db.create_issue(req, Some(reporter)))
        .await?;
    tracing::info!(issue_id = issue.id, key = %issue.key, "Issue created");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::IssueCreated {
            issue: issue.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(issue))))
}

/// `{id}` is either the numeric id or the issue key (`KAR-12`).
pub async fn get_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id_or_key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let not_found = format!("Issue {} not found", id_or_key);
    let detail = state
        .db
        .call(move |db| {
            let id = match id_or_key.parse::<i64>() {
                Ok(id) => id,
                Err(_) => match db.get_issue_by_key(&id_or_key)? {
                    Some(issue) => issue.id,
                    None => return Ok(None),
                },
            };
            db.get_issue_detail(id)
        })
        .await?
        .ok_or(ApiError::NotFound(not_found))?;
    Ok(Json(ApiResponse::ok(detail)))
}

pub async fn update_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<IssuePatch>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::IssuesWrite)?;
    apply_patch(&state, id, patch).await
}

pub async fn transition_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<TransitionRequest>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::IssuesWrite)?;
    let patch = IssuePatch {
        status: Some(req.status),
        ..Default::default()
    };
    apply_patch(&state, id, patch).await
}

async fn apply_patch(
    state: &SharedState,
    id: i64,
    patch: IssuePatch,
) -> ApiResult<Json<ApiResponse<kartavya_common::models::Issue>>> {
    let issue = state
        .db
        .call(move |db| {
            db.update_issue(id, patch)?
                .ok_or_else(|| TrackerError::not_found("Issue", id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::IssueUpdated {
            issue: issue.clone(),
        },
    );
    Ok(Json(ApiResponse::ok(issue)))
}

pub async fn move_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(mv): ApiJson<IssueMove>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::IssuesWrite)?;
    let (from_status, issue) = state
        .db
        .call(move |db| {
            let from_status = db.require_issue(id)?.status;
            let issue = db
                .move_issue(id, mv)?
                .ok_or_else(|| TrackerError::not_found("Issue", id))?;
            Ok((from_status, issue))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::IssueMoved {
            issue_id: id,
            from_status,
            to_status: issue.status.clone(),
            position: issue.position,
        },
    );
    Ok(Json(ApiResponse::ok(issue)))
}

pub async fn delete_issue(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::IssuesWrite)?;
    let deleted = state.db.call(move |db| db.delete_issue(id)).await?;
    if !deleted {
        return Err(TrackerError::not_found("Issue", id).into());
    }
    broadcast_message(&state.ws_tx, &WsMessage::IssueDeleted { issue_id: id });
    Ok(Json(ApiResponse::done()))
}
