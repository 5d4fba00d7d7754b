//! API routes for relay-web

use crate::AppState;
use crate::sse::feed_response;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relay_core::{
    AccountId, ActiveTaskInfo, Credentials, ManagerError, PendingSummary, Scope, SubmitError,
};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Outcome of a run or input request
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            error: None,
        })
    }

    fn failed(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                error: Some(error.into()),
            }),
        )
    }
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ==================== User Endpoints ====================

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub phone: Option<String>,
}

/// Live feed of one account
async fn account_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Some(phone) = query
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "缺少 phone 参数".to_string(),
            }),
        )
            .into_response();
    };

    let feed = state.hub().subscribe(Scope::Account(AccountId::new(phone)));
    feed_response(feed).into_response()
}

/// Request body for starting an account's task
#[derive(Debug, Deserialize)]
pub struct UserRunRequest {
    pub phone: String,
    #[serde(default)]
    pub password: String,
}

/// Start the task for an account
async fn user_run(
    State(state): State<AppState>,
    Json(request): Json<UserRunRequest>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<SuccessResponse>)> {
    let phone = request.phone.trim();
    if phone.is_empty() {
        return Err(SuccessResponse::failed(
            StatusCode::BAD_REQUEST,
            "缺少 phone 参数",
        ));
    }

    match state
        .manager
        .start(Credentials::new(phone, request.password))
        .await
    {
        Ok(_handle) => Ok(SuccessResponse::ok()),
        Err(ManagerError::AlreadyRunning { .. }) => Err(SuccessResponse::failed(
            StatusCode::CONFLICT,
            "任务正在运行",
        )),
    }
}

/// Request body for answering an input request
#[derive(Debug, Deserialize)]
pub struct UserInputRequest {
    pub callback: String,
    #[serde(default)]
    pub value: String,
}

/// Submit a value for a pending input request
async fn user_input(
    State(state): State<AppState>,
    Json(request): Json<UserInputRequest>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<SuccessResponse>)> {
    state
        .gateway
        .submit(&request.callback, &request.value)
        .map(|()| SuccessResponse::ok())
        .map_err(|e| match e {
            SubmitError::UnknownCallback(_) => {
                SuccessResponse::failed(StatusCode::NOT_FOUND, "无效的回调ID")
            }
            SubmitError::EmptyCallback | SubmitError::MultiLineValue => {
                SuccessResponse::failed(StatusCode::BAD_REQUEST, e.to_string())
            }
        })
}

// ==================== Admin Endpoints ====================

/// Live feed of every account
async fn admin_stream(State(state): State<AppState>) -> Response {
    feed_response(state.hub().subscribe(Scope::Global)).into_response()
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<ActiveTaskInfo>> {
    Json(state.manager.list_active().await)
}

async fn list_pending(State(state): State<AppState>) -> Json<Vec<PendingSummary>> {
    Json(state.manager.registry().snapshot())
}

/// Routes served by the user app.
pub fn user_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stream", get(account_stream))
        .route("/api/user-run", post(user_run))
        .route("/api/user-input", post(user_input))
        .with_state(state)
}

/// Routes served by the admin app.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/admin-stream", get(admin_stream))
        .route("/api/admin/tasks", get(list_tasks))
        .route("/api/admin/pending", get(list_pending))
        .with_state(state)
}
