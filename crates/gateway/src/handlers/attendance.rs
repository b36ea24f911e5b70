//! Learner-facing attendance handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use rollcall_common::{auth::CallerContext, db::models::AttendanceSession, errors::Result};

/// Request to check in to a course
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub course_id: Uuid,
}

/// An attendance session as returned to callers
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub course_id: Uuid,
    pub status: String,
    pub source: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_sec: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    pub last_heartbeat_at: Option<String>,
}

impl From<AttendanceSession> for SessionResponse {
    fn from(session: AttendanceSession) -> Self {
        Self {
            id: session.id,
            course_id: session.course_id,
            status: session.status,
            source: session.source,
            start_time: session.start_time.to_rfc3339(),
            end_time: session.end_time.map(|dt| dt.to_rfc3339()),
            duration_sec: session.duration_sec,
            confidence: session.confidence,
            close_reason: session.close_reason,
            last_heartbeat_at: session.last_heartbeat_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// What the self-checkout form needs before submission
#[derive(Debug, Serialize)]
pub struct SelfCheckoutInfoResponse {
    pub session: SessionResponse,
    pub notified: bool,
    pub earliest_end_time: String,
    pub latest_end_time: String,
}

/// Request to close a session at a caller-supplied end time
#[derive(Debug, Deserialize)]
pub struct SelfCheckoutRequest {
    pub end_time: chrono::DateTime<chrono::Utc>,
}

/// Check in to a course, or return the existing open session for the
/// same course (idempotent repeat check-in).
pub async fn check_in(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(request): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let check_in = state
        .engine
        .check_in(caller.tenant_id, caller.user_id, request.course_id)
        .await?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        user_id = %caller.user_id,
        course_id = %request.course_id,
        session_id = %check_in.session.id,
        existing = check_in.is_existing,
        "Check-in accepted"
    );

    let status = if check_in.is_existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(check_in.session.into())))
}

/// Refresh an open session's liveness timestamp
pub async fn heartbeat(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let session = state
        .engine
        .heartbeat(caller.tenant_id, session_id, caller.user_id)
        .await?;

    Ok(Json(session.into()))
}

/// Close the caller's session at the current time
pub async fn check_out(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let session = state
        .engine
        .check_out(caller.tenant_id, session_id, caller.user_id)
        .await?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        session_id = %session_id,
        duration_sec = session.duration_sec,
        "Check-out complete"
    );

    Ok(Json(session.into()))
}

/// Fetch the self-checkout form payload: notification precondition and
/// the acceptable end-time window.
pub async fn self_checkout_info(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SelfCheckoutInfoResponse>> {
    let info = state
        .engine
        .self_checkout_info(caller.tenant_id, session_id, caller.user_id)
        .await?;

    Ok(Json(SelfCheckoutInfoResponse {
        session: info.session.into(),
        notified: info.notified,
        earliest_end_time: info.earliest_end_time.to_rfc3339(),
        latest_end_time: info.latest_end_time.to_rfc3339(),
    }))
}

/// Close a forgotten session at a caller-supplied end time
pub async fn self_checkout(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelfCheckoutRequest>,
) -> Result<Json<SessionResponse>> {
    let session = state
        .engine
        .self_checkout(caller.tenant_id, session_id, caller.user_id, request.end_time)
        .await?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        session_id = %session_id,
        end_time = %request.end_time,
        "Self-checkout complete"
    );

    Ok(Json(session.into()))
}
