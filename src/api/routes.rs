//! Route handlers for the lab API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::types::{LabOptions, LabSnapshot, LabStatus, LabSummary};

/// Minimum accepted prompt length in characters.
const MIN_PROMPT_CHARS: usize = 10;

/// `POST /api/labs/create` request body.
#[derive(Debug, Deserialize)]
pub struct CreateLabRequest {
    /// Instructor prompt describing the wanted lab.
    pub prompt: String,
    /// Skip the Validator stage.
    #[serde(default)]
    pub dry_run: bool,
    /// Allow RCA-driven retries on validation failure.
    #[serde(default = "default_enable_rca")]
    pub enable_rca: bool,
}

fn default_enable_rca() -> bool {
    true
}

/// `POST /api/labs/create` response body.
#[derive(Debug, Serialize)]
pub struct CreateLabResponse {
    /// Fresh lab identifier.
    pub lab_id: String,
    /// Initial status, always `planner_running`.
    pub status: LabStatus,
}

/// `POST /api/labs/{id}/message` request body.
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    /// Chat message content.
    pub content: String,
}

/// `POST /api/labs/{id}/message` response body.
#[derive(Debug, Serialize)]
pub struct PostMessageResponse {
    /// Always `"message_received"`.
    pub status: &'static str,
    /// The lab's conversation status at enqueue time.
    pub conversation_status: LabStatus,
}

/// `GET /api/health` response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Number of labs in the registry.
    pub labs: usize,
}

/// `POST /api/labs/create` — validate the prompt and launch a pipeline.
pub async fn create_lab(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateLabRequest>,
) -> Result<Json<CreateLabResponse>, ApiError> {
    if body.prompt.chars().count() < MIN_PROMPT_CHARS {
        return Err(ApiError::bad_request(format!(
            "prompt must be at least {MIN_PROMPT_CHARS} characters"
        )));
    }

    let options = LabOptions {
        dry_run: body.dry_run,
        enable_rca: body.enable_rca,
    };
    let lab_id = state.orchestrator.launch(body.prompt, options).await;

    Ok(Json(CreateLabResponse {
        lab_id,
        status: LabStatus::PlannerRunning,
    }))
}

/// `POST /api/labs/{id}/message` — enqueue an instructor chat message.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(lab_id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<PostMessageResponse>, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("message content must not be empty"));
    }

    let conversation_status = state
        .orchestrator
        .registry()
        .enqueue_message(&lab_id, body.content)
        .await?;

    Ok(Json(PostMessageResponse {
        status: "message_received",
        conversation_status,
    }))
}

/// `GET /api/labs/{id}/status` and `GET /api/labs/{id}` — full snapshot.
pub async fn lab_status(
    State(state): State<Arc<AppState>>,
    Path(lab_id): Path<String>,
) -> Result<Json<LabSnapshot>, ApiError> {
    let snapshot = state.orchestrator.registry().snapshot(&lab_id).await?;
    Ok(Json(snapshot))
}

/// `GET /api/labs` — summaries, newest first.
pub async fn list_labs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LabSummary>>, ApiError> {
    Ok(Json(state.orchestrator.registry().list().await))
}

/// `GET /api/health` — liveness plus registry size.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        labs: state.orchestrator.registry().count().await,
    })
}
