//! Administrative session handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::attendance::SessionResponse;
use crate::AppState;
use rollcall_common::{auth::CallerContext, errors::Result};

/// Request to close a session on a learner's behalf
#[derive(Debug, Default, Deserialize)]
pub struct AdminCloseRequest {
    /// Close time; defaults to now
    #[serde(default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Close any open session, regardless of owner or elapsed time
pub async fn close_session(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
    Json(request): Json<AdminCloseRequest>,
) -> Result<Json<SessionResponse>> {
    caller.require_admin()?;

    let session = state
        .engine
        .admin_close(caller.tenant_id, session_id, request.end_time)
        .await?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        session_id = %session_id,
        admin_id = %caller.user_id,
        "Session closed by administrator"
    );

    Ok(Json(session.into()))
}

/// Delete a session outright, lifting the completion lock for its
/// (user, course) pair.
pub async fn delete_session(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    caller.require_admin()?;

    state
        .engine
        .admin_delete(caller.tenant_id, session_id)
        .await?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        session_id = %session_id,
        admin_id = %caller.user_id,
        "Session deleted by administrator"
    );

    Ok(StatusCode::NO_CONTENT)
}
