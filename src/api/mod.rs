//! HTTP glue around the [`Coordinator`].
//!
//! Clients identify themselves with the `x-session-id` header. A request
//! without one is issued a fresh id, echoed back in the response header and
//! body; the client is expected to present it from then on.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::coordinator::{AssignOutcome, Coordinator, Decision, LeaderboardRow};
use crate::error::{CoordinatorError, ExportError};
use crate::export;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
}

#[derive(Deserialize)]
struct SetUsernameRequest {
    username: String,
}

#[derive(Deserialize)]
struct MarkRequest {
    item_index: usize,
    liked: bool,
}

#[derive(Serialize)]
struct LeaderboardResponse {
    leaderboard: Vec<LeaderboardRow>,
    total_users: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/current", get(current_handler))
        .route("/api/set-username", post(set_username_handler))
        .route("/api/mark", post(mark_handler))
        .route("/api/restart", post(restart_handler))
        .route("/api/progress", get(progress_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/api/export/:category", get(export_handler))
        .route("/api/admin/reset", post(admin_reset_handler))
        .route("/api/admin/stats", get(admin_stats_handler))
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let app = router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Review API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Session id from the request, or a newly issued one.
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn with_session(session_id: &str, status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(SESSION_HEADER, session_id.to_string())],
        Json(body),
    )
        .into_response()
}

fn error_body(message: impl std::fmt::Display) -> serde_json::Value {
    json!({ "success": false, "error": message.to_string() })
}

fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::NoActiveAssignment(_) | CoordinatorError::AssignmentMismatch { .. } => {
            StatusCode::CONFLICT
        }
        CoordinatorError::InvalidUsername => StatusCode::BAD_REQUEST,
        CoordinatorError::UnknownItem(_) => StatusCode::NOT_FOUND,
        CoordinatorError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn current_handler(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let sid = session_id(&headers);
    let coordinator = &state.coordinator;

    let username = coordinator.session(&sid).await.and_then(|s| s.username);
    let Some(username) = username else {
        let progress = coordinator.progress().await;
        return with_session(
            &sid,
            StatusCode::OK,
            json!({ "requires_username": true, "session_id": sid, "progress": progress }),
        );
    };

    // The sweep inside `assign` may drop an idle session record; re-register
    // the name with it so completions stay attributed.
    match coordinator.assign(&sid, Some(&username)).await {
        Ok(outcome) => {
            let progress = coordinator.progress().await;
            let user_stats = coordinator.leaderboard_entry(&username).await;
            let body = match outcome {
                AssignOutcome::Assigned(a) => json!({
                    "finished": false,
                    "session_id": sid,
                    "item": a.item,
                    "item_index": a.index,
                    "resumed": a.resumed,
                    "progress": progress,
                    "username": username,
                    "user_stats": user_stats,
                }),
                AssignOutcome::Exhausted => json!({
                    "finished": true,
                    "session_id": sid,
                    "progress": progress,
                    "username": username,
                    "user_stats": user_stats,
                }),
            };
            with_session(&sid, StatusCode::OK, body)
        }
        Err(e) => with_session(&sid, status_for(&e), error_body(e)),
    }
}

async fn set_username_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<SetUsernameRequest>,
) -> Response {
    let sid = session_id(&headers);
    match state.coordinator.register(&sid, &payload.username).await {
        Ok(stats) => {
            let username = state.coordinator.session(&sid).await.and_then(|s| s.username);
            with_session(
                &sid,
                StatusCode::OK,
                json!({ "success": true, "username": username, "user_stats": stats }),
            )
        }
        Err(e) => with_session(&sid, status_for(&e), error_body(e)),
    }
}

async fn mark_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<MarkRequest>,
) -> Response {
    let sid = session_id(&headers);
    let decision = Decision::from(payload.liked);
    match state
        .coordinator
        .complete_item(&sid, payload.item_index, decision)
        .await
    {
        Ok(completion) => with_session(
            &sid,
            StatusCode::OK,
            json!({ "success": true, "completion": completion }),
        ),
        Err(e) => {
            tracing::debug!(session_id = %sid, error = %e, "Mark rejected");
            with_session(&sid, status_for(&e), error_body(e))
        }
    }
}

async fn restart_handler(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let sid = session_id(&headers);
    match state.coordinator.release(&sid).await {
        Ok(released) => with_session(
            &sid,
            StatusCode::OK,
            json!({ "success": true, "released": released }),
        ),
        Err(e) => with_session(&sid, status_for(&e), error_body(e)),
    }
}

async fn progress_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.coordinator.progress().await)
}

async fn leaderboard_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let leaderboard = state.coordinator.leaderboard().await;
    Json(LeaderboardResponse {
        total_users: leaderboard.len(),
        leaderboard,
    })
}

async fn export_handler(
    State(state): State<ApiState>,
    Path(category): Path<String>,
) -> Response {
    let decision: Decision = match category.parse() {
        Ok(d) => d,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid category" })))
                .into_response()
        }
    };

    let coordinator = &state.coordinator;
    let items = coordinator.completed(decision).await;
    match export::to_csv_string(coordinator.catalog().extra_columns(), &items) {
        Ok(csv) => {
            let disposition = format!(
                "attachment; filename={}",
                export::export_file_name(decision, Utc::now())
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                csv,
            )
                .into_response()
        }
        Err(ExportError::Empty) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("No {} items to export", decision) })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn admin_reset_handler(State(state): State<ApiState>) -> Response {
    match state.coordinator.reset_all().await {
        Ok(()) => Json(json!({
            "success": true,
            "message": "All progress and leaderboard reset",
        }))
        .into_response(),
        Err(e) => (status_for(&e), Json(error_body(e))).into_response(),
    }
}

async fn admin_stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.coordinator.stats().await)
}
