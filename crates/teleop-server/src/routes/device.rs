use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/device/initiate — device WebSocket endpoint.
pub async fn initiate(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    let registry = app.registry.clone();
    ws.on_upgrade(move |socket| async move {
        registry.accept(socket).await;
    })
}

/// POST /api/device/link/:code — claim a paired device for an operator.
pub async fn link(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.registry.link(&code).await?;
    Ok(Json(serde_json::json!({ "message": "Linked!" })))
}

/// POST /api/device/unlink/:code — release a device back to pairing.
pub async fn unlink(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.registry.unlink(&code).await?;
    Ok(Json(serde_json::json!({ "message": "Unlinked!" })))
}

/// GET /api/device/status/:code — 1 if linked, 0 otherwise. Doubles as the
/// operator heartbeat.
pub async fn status(State(app): State<AppState>, Path(code): Path<String>) -> Json<serde_json::Value> {
    let status = app.registry.status(&code).await;
    Json(serde_json::json!({ "status": status }))
}

/// POST /api/device/clear_visual/:code — clear the device display.
pub async fn clear_visual(
    State(app): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.registry.clear_visual(&code).await?;
    Ok(Json(serde_json::json!({ "message": "Visuals cleared." })))
}
