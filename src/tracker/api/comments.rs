use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kartavya_common::ApiResponse;
use kartavya_common::models::Permission;
use serde::Deserialize;

use super::{ApiJson, ApiResult, SharedState};
use crate::errors::TrackerError;
use crate::tracker::auth::Principal;
use crate::tracker::db::NewComment;
use crate::tracker::ws::{WsMessage, broadcast_message};

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub content: String,
}

pub async fn list_comments(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(issue_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::Read)?;
    let comments = state
        .db
        .call(move |db| {
            db.require_issue(issue_id)?;
            db.list_comments(issue_id)
        })
        .await?;
    let total = comments.len();
    Ok(Json(ApiResponse::list(comments, total)))
}

pub async fn add_comment(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(issue_id): Path<i64>,
    ApiJson(req): ApiJson<CommentBody>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::CommentsWrite)?;
    let author_id = principal.user.id;
    let comment = state
        .db
        .call(move |db| {
            db.create_comment(NewComment {
                issue_id,
                author_id: Some(author_id),
                content: req.content,
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CommentAdded {
            comment: comment.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(comment))))
}

pub async fn update_comment(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<CommentBody>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::CommentsWrite)?;
    let comment = state
        .db
        .call(move |db| {
            let existing = db
                .get_comment(id)?
                .ok_or_else(|| TrackerError::not_found("Comment", id))?;
            principal.require_owner_or_admin(existing.author_id)?;
            db.update_comment(id, &req.content)?
                .ok_or_else(|| TrackerError::not_found("Comment", id))
        })
        .await?;
    Ok(Json(ApiResponse::ok(comment)))
}

pub async fn delete_comment(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::CommentsWrite)?;
    state
        .db
        .call(move |db| {
            let existing = db
                .get_comment(id)?
                .ok_or_else(|| TrackerError::not_found("Comment", id))?;
            principal.require_owner_or_admin(existing.author_id)?;
            db.delete_comment(id)
        })
        .await?;
    Ok(Json(ApiResponse::done()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::http::StatusCode;
    use kartavya_common::models::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_and_list_comments() {
        let app = TestApp::new();
        let admin = app.admin();
        let (dev_id, dev) = app.user_token("dev@example.com", Role::Developer);
        let project = app.project(&admin, "COM").await;
        let issue = app.issue(&admin, project, "Talk").await["id"].as_i64().unwrap();
        let uri = format!("/api/issues/{}/comments", issue);
        let mut rx = app.state.ws_tx.subscribe();

        let (status, body) = app.post(&uri, &dev, json!({"content": "On it"})).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["author_id"], dev_id);

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "CommentAdded");

        let (status, body) = app.get(&uri, &dev).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["content"], "On it");

        let (status, _) = app.get("/api/issues/999/comments", &dev).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_only_author_or_admin_edits_comment() {
        let app = TestApp::new();
        let admin = app.admin();
        let (_, author) = app.user_token("author@example.com", Role::Developer);
        let (_, other) = app.user_token("other@example.com", Role::Developer);
        let project = app.project(&admin, "OWN").await;
        let issue = app.issue(&admin, project, "Talk").await["id"].as_i64().unwrap();
        let (_, body) = app
            .post(
                &format!("/api/issues/{}/comments", issue),
                &author,
                json!({"content": "Mine"}),
            )
            .await;
        let uri = format!("/api/comments/{}", body["data"]["id"]);

        let (status, _) = app.put(&uri, &other, json!({"content": "Hijack"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.put(&uri, &author, json!({"content": "Edited"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "Edited");

        let (status, _) = app.delete(&uri, &other).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&uri, &admin).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.delete(&uri, &admin).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_viewer_cannot_comment() {
        let app = TestApp::new();
        let admin = app.admin();
        let (_, viewer) = app.user_token("viewer@example.com", Role::Viewer);
        let project = app.project(&admin, "VW").await;
        let issue = app.issue(&admin, project, "Quiet").await["id"].as_i64().unwrap();
        let (status, _) = app
            .post(
                &format!("/api/issues/{}/comments", issue),
                &viewer,
                json!({"content": "hi"}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
