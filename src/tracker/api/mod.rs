//! REST surface. Every handler answers with the [`ApiResponse`] envelope.

mod comments;
mod filters;
mod issues;
mod projects;
mod sprints;
mod tokens;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use kartavya_common::ApiResponse;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use super::auth::{self, TokenSigner};
use super::db::DbHandle;
use super::ws;
use crate::errors::TrackerError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub signer: TokenSigner,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            TrackerError::Validation(msg) => ApiError::BadRequest(msg),
            TrackerError::InvalidTransition { .. } => ApiError::BadRequest(err.to_string()),
            TrackerError::Conflict(msg) => ApiError::Conflict(msg),
            TrackerError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            TrackerError::Forbidden(msg) => ApiError::Forbidden(msg),
            TrackerError::Database(_) | TrackerError::LockPoisoned | TrackerError::Other(_) => {
                ApiError::Internal(format!("{:#}", anyhow::Error::from(err)))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Extractors ────────────────────────────────────────────────────────

/// `Json` whose rejections use the error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` whose rejections use the error envelope.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// Resolve the bearer token and stash the [`auth::Principal`] in the
/// request extensions for handlers.
async fn require_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

    let signer = state.signer.clone();
    let principal = state
        .db
        .call(move |db| auth::authenticate(db, &signer, &bearer))
        .await?;
    tracing::Span::current().record("user_id", principal.user.id);
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(users::me))
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/api/projects/{id}/board", get(projects::get_board))
        .route(
            "/api/projects/{id}/workflow",
            get(projects::get_workflow).put(projects::put_workflow),
        )
        .route("/api/projects/{id}/report", get(projects::project_report))
        .route(
            "/api/issues",
            get(issues::list_issues).post(issues::create_issue),
        )
        .route(
            "/api/issues/{id}",
            get(issues::get_issue)
                .put(issues::update_issue)
                .delete(issues::delete_issue),
        )
        .route("/api/issues/{id}/transition", post(issues::transition_issue))
        .route("/api/issues/{id}/move", patch(issues::move_issue))
        .route(
            "/api/issues/{id}/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route(
            "/api/comments/{id}",
            put(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/api/tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route("/api/tokens/{id}", axum::routing::delete(tokens::delete_token))
        .route(
            "/api/sprints",
            get(sprints::list_sprints).post(sprints::create_sprint),
        )
        .route(
            "/api/sprints/{id}",
            get(sprints::get_sprint)
                .put(sprints::update_sprint)
                .delete(sprints::delete_sprint),
        )
        .route("/api/sprints/{id}/start", post(sprints::start_sprint))
        .route("/api/sprints/{id}/complete", post(sprints::complete_sprint))
        .route("/api/sprints/{id}/report", get(sprints::sprint_report))
        .route(
            "/api/filters",
            get(filters::list_filters).post(filters::create_filter),
        )
        .route(
            "/api/filters/{id}",
            get(filters::get_filter)
                .put(filters::update_filter)
                .delete(filters::delete_filter),
        )
        .route("/api/filters/{id}/issues", get(filters::run_filter))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/login", post(users::login))
        .route("/ws", get(ws::ws_handler))
        .merge(protected)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

// ── Test support ──────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::tracker::db::{NewUser, TrackerDb};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use kartavya_common::models::Role;
    use serde_json::Value;
    use tower::ServiceExt;

    pub const PASSWORD: &str = "password123";

    pub struct TestApp {
        pub router: Router,
        pub state: SharedState,
    }

    impl TestApp {
        pub fn new() -> Self {
            let db = TrackerDb::new_in_memory().unwrap();
            let (ws_tx, _) = broadcast::channel(16);
            let state = Arc::new(AppState {
                db: DbHandle::new(db),
                ws_tx,
                signer: TokenSigner::new(b"test-secret-test-secret-test-secret".to_vec(), 3600),
            });
            Self {
                router: api_router(state.clone()),
                state,
            }
        }

        /// Create a user directly and return a session token for them.
        pub fn user_token(&self, email: &str, role: Role) -> (i64, String) {
            let db = self.state.db.lock_sync().unwrap();
            let user = db
                .create_user(NewUser {
                    name: email.split('@').next().unwrap_or(email).to_string(),
                    email: email.to_string(),
                    password_hash: auth::hash_password(PASSWORD),
                    role,
                })
                .unwrap();
            let (token, _) = self.state.signer.issue(&user).unwrap();
            (user.id, token)
        }

        pub fn admin(&self) -> String {
            self.user_token("admin@example.com", Role::Admin).1
        }

        pub async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = HttpRequest::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::String(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))
            };
            (status, json)
        }

        pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
            self.send("GET", uri, Some(token), None).await
        }

        pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
            self.send("POST", uri, Some(token), Some(body)).await
        }

        pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
            self.send("PUT", uri, Some(token), Some(body)).await
        }

        pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
            self.send("DELETE", uri, Some(token), None).await
        }

        /// Create a project through the API and return its id.
        pub async fn project(&self, token: &str, key: &str) -> i64 {
            let (status, body) = self
                .post(
                    "/api/projects",
                    token,
                    serde_json::json!({"name": format!("Project {}", key), "key": key}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["data"]["id"].as_i64().unwrap()
        }

        pub async fn issue(&self, token: &str, project_id: i64, summary: &str) -> Value {
            let (status, body) = self
                .post(
                    "/api/issues",
                    token,
                    serde_json::json!({"project_id": project_id, "summary": summary}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["data"].clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestApp;
    use super::*;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check_is_public() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("ok"));
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing bearer token");

        let (status, _) = app.get("/api/projects", "v1.bogus.token").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_json_uses_error_envelope() {
        let app = TestApp::new();
        let token = app.admin();
        let response = app
            .router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/projects")
                    .header("authorization", format!("Bearer {}", token))
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_query_uses_error_envelope() {
        let app = TestApp::new();
        let token = app.admin();
        let (status, body) = app.get("/api/issues?limit=lots", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[test]
    fn test_tracker_error_status_mapping() {
        let cases = [
            (TrackerError::not_found("Issue", 1), StatusCode::NOT_FOUND),
            (TrackerError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                TrackerError::InvalidTransition {
                    from: "a".into(),
                    to: "b".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (TrackerError::Conflict("dup".into()), StatusCode::CONFLICT),
            (TrackerError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (TrackerError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (
                TrackerError::Database(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
