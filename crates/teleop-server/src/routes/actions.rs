use axum::extract::State;
use axum::Json;
use teleop_core::action::Action;

use crate::state::AppState;

/// GET /api/actions — list all registered actions.
pub async fn list_actions(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": app.actions.all() }))
}

/// POST /api/actions — register an action (composite children are
/// registered under their own ids as well).
pub async fn create_action(
    State(app): State<AppState>,
    Json(action): Json<Action>,
) -> Json<serde_json::Value> {
    let id = action.id();
    app.actions.add(action);
    Json(serde_json::json!({ "message": "Action created!", "id": id }))
}
