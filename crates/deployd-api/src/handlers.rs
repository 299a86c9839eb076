//! REST API handlers.
//!
//! Submissions go to the executor's request queue; every query reads the
//! shared resource tracker.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

use deployd_core::{FragmentRequest, ResourceIdentity};
use deployd_executor::QueueError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Fragments ──────────────────────────────────────────────────

/// POST /api/v1/fragments
pub async fn submit_fragment(
    State(state): State<ApiState>,
    Json(request): Json<FragmentRequest>,
) -> impl IntoResponse {
    let request_id = request.request_id.clone();
    let queue = state.executor.queue();
    match queue.push(request) {
        Ok(()) => {
            info!(%request_id, "fragment accepted");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({
                    "request_id": request_id,
                    "queued": queue.len(),
                })),
            )
                .into_response()
        }
        Err(e @ QueueError::Malformed(_)) => {
            warn!(%request_id, error = %e, "fragment rejected");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e @ QueueError::Closed) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

/// GET /api/v1/fragments
pub async fn list_fragments(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "queued": state.executor.queue().len(),
        "outcomes": state.executor.outcomes(),
    }))
}

// ── Resources ──────────────────────────────────────────────────

/// Optional filter for the resource listing.
#[derive(serde::Deserialize)]
pub struct ResourceQuery {
    pub app_instance_id: Option<String>,
}

/// GET /api/v1/resources
pub async fn list_resources(
    State(state): State<ApiState>,
    Query(query): Query<ResourceQuery>,
) -> impl IntoResponse {
    let resources = match query.app_instance_id {
        Some(app) => state.tracker.list_for_app(&app),
        None => state.tracker.snapshot(),
    };
    ApiResponse::ok(resources)
}

/// DELETE /api/v1/resources/{app_instance_id}/{service_id}/{uid}
pub async fn remove_resource(
    State(state): State<ApiState>,
    Path((app_instance_id, service_id, uid)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let identity = ResourceIdentity::new(app_instance_id, service_id, uid);
    match state.tracker.remove(&identity) {
        Some(resource) => ApiResponse::ok(resource).into_response(),
        None => error_response("resource not tracked", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Applications ───────────────────────────────────────────────

/// GET /api/v1/apps/{app_instance_id}/status
pub async fn app_status(
    State(state): State<ApiState>,
    Path(app_instance_id): Path<String>,
) -> impl IntoResponse {
    let summary = state.tracker.summary(&app_instance_id);
    if summary.total == 0 {
        return error_response("application instance not tracked", StatusCode::NOT_FOUND)
            .into_response();
    }
    ApiResponse::ok(summary).into_response()
}
