use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct SendCommandBody {
    pub item_id: Uuid,
    pub code: String,
}

/// POST /api/device/send_command — dispatch an action on a connection and
/// wait for its outcome. Contention and lookup failures come back as
/// structured replies, never as HTTP faults.
pub async fn send_command(
    State(app): State<AppState>,
    Json(body): Json<SendCommandBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(conn) = app.registry.get(&body.code).await else {
        return Ok(Json(serde_json::json!({
            body.item_id.to_string(): "action_error",
            "message": "You're not connected to a robot!",
        })));
    };
    let reply = app.engine.dispatch(&conn, body.item_id).await;
    Ok(Json(reply.to_json()))
}
