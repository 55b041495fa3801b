//! Internal admin surface: forced presence removal (block/kick).
//!
//! Authentication happens upstream in the CRUD tier; this service is only
//! reachable from inside the platform.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::error::RealtimeError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/admin/presence/{user_id}/disconnect",
        post(disconnect_user),
    )
}

/// Force-remove every live connection of a user from the presence store,
/// then refresh admin dashboards.
async fn disconnect_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, RealtimeError> {
    state.presence.unregister_user(&user_id).await?;
    tracing::info!(user_id = %user_id, "user force-unregistered");
    state.admin.broadcast_online_count().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
