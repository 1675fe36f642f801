//! Worker endpoints (`/__sw/*`) and the app JSON API (`/__app/*`)

use super::{AppState, ApiError};
use crate::analytics::Stats;
use crate::preferences::PreferenceSet;
use crate::worker::push::{ClickOutcome, NotificationDescriptor, PushOutcome};
use crate::worker::WorkerState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Worker endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// POST /__sw/push - deliver a push message; the body is the raw payload
pub async fn push(State(state): State<AppState>, body: Bytes) -> Json<PushOutcome> {
    Json(state.worker.push().on_push(Some(body.as_ref())))
}

#[derive(Debug, Deserialize)]
pub struct ClickRequest {
    pub id: String,
    #[serde(default)]
    pub action: Option<String>,
}

/// POST /__sw/notificationclick
pub async fn notification_click(
    State(state): State<AppState>,
    Json(request): Json<ClickRequest>,
) -> Result<Json<ClickOutcome>, ApiError> {
    match state
        .worker
        .push()
        .on_notification_click(&request.id, request.action.as_deref())
        .await
    {
        ClickOutcome::Unknown => Err(ApiError::NotFound(format!(
            "No displayed notification '{}'",
            request.id
        ))),
        outcome => Ok(Json(outcome)),
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub id: String,
}

/// POST /__sw/notify - show a notification directly (skips preference filtering)
pub async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    let url = request.url.as_deref().unwrap_or("/");
    state
        .worker
        .push()
        .show(&request.title, &request.body, url, request.category)
        .map(|id| Json(NotifyResponse { id }))
        .ok_or_else(|| ApiError::Internal("Notification display failed".into()))
}

/// GET /__sw/notifications
pub async fn notifications(State(state): State<AppState>) -> Json<Vec<NotificationDescriptor>> {
    Json(state.worker.push().displayed())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub origin: String,
    pub cache_name: String,
    pub precache: usize,
}

/// GET /__sw/state
pub async fn worker_state(State(state): State<AppState>) -> Json<WorkerStatus> {
    let settings = state.worker.settings();
    Json(WorkerStatus {
        state: state.worker.state(),
        origin: settings.origin.to_string(),
        cache_name: settings.cache_name.clone(),
        precache: settings.precache.len(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// App API
// ─────────────────────────────────────────────────────────────────────────────

/// GET /__app/preferences
pub async fn preferences(State(state): State<AppState>) -> Result<Json<PreferenceSet>, ApiError> {
    let prefs = state
        .preferences
        .lock()
        .map_err(|_| ApiError::poisoned("preferences"))?;
    Ok(Json(prefs.preferences().clone()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub changed: bool,
}

/// POST /__app/preferences/reload - pick up preferences written by another process
pub async fn reload_preferences(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let mut prefs = state
        .preferences
        .lock()
        .map_err(|_| ApiError::poisoned("preferences"))?;
    Ok(Json(ReloadResponse {
        changed: prefs.reload(),
    }))
}

/// GET /__app/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let log = state
        .analytics
        .lock()
        .map_err(|_| ApiError::poisoned("analytics"))?;
    Ok(Json(log.stats()))
}
