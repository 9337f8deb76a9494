use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/motions — the motions the device declared on connect.
pub async fn list_motions(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "motions": app.motions.all() }))
}
