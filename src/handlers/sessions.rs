use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// `POST /force-stop/{session_id}`
///
/// Ends a live session through the normal teardown path: the client gets
/// `session_end`, the remote gets `control.stop`, both sockets close and the
/// session is unregistered.
pub async fn force_stop(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    if session_id.trim().is_empty() {
        return Err(AppError::ValidationError("Session id cannot be empty".to_string()));
    }

    info!(session_id = %session_id, "Force stop requested");
    state.lifecycle.force_stop(&session_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "Session forcefully stopped"
    })))
}
