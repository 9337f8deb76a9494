use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/recording/start/:code — begin the session command log.
pub async fn start(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.recording.start(&code)?;
    Ok(Json(serde_json::json!({ "message": "Recording started..." })))
}

/// GET /api/recording/pause/:code
pub async fn pause(State(app): State<AppState>, Path(code): Path<String>) -> Json<serde_json::Value> {
    app.recording.pause(&code);
    Json(serde_json::json!({ "message": "Recording paused." }))
}

/// GET /api/recording/resume/:code
pub async fn resume(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Json<serde_json::Value> {
    app.recording.resume(&code);
    Json(serde_json::json!({ "message": "Recording resumed..." }))
}

/// GET /api/recording/stop/:code
pub async fn stop(State(app): State<AppState>, Path(code): Path<String>) -> Json<serde_json::Value> {
    app.recording.stop(&code);
    Json(serde_json::json!({ "message": "Recording finished!" }))
}
