//! Attendance session entity
//!
//! One attendance interval for a (user, course) pair. Invariants
//! enforced by the engine, not the entity: at most one `open` session
//! per user across all courses, and a finished session acts as a
//! completion lock for its (user, course) pair until deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Session status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
    Adjusted,
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => SessionStatus::Open,
            "closed" => SessionStatus::Closed,
            "adjusted" => SessionStatus::Adjusted,
            _ => SessionStatus::Open,
        }
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Open => "open".to_string(),
            SessionStatus::Closed => "closed".to_string(),
            SessionStatus::Adjusted => "adjusted".to_string(),
        }
    }
}

/// How the session's close was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Manual,
    Video,
}

impl From<String> for SessionSource {
    fn from(s: String) -> Self {
        match s.as_str() {
            "manual" => SessionSource::Manual,
            "video" => SessionSource::Video,
            _ => SessionSource::Manual,
        }
    }
}

impl From<SessionSource> for String {
    fn from(source: SessionSource) -> Self {
        match source {
            SessionSource::Manual => "manual".to_string(),
            SessionSource::Video => "video".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    pub course_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: Option<DateTimeWithTimeZone>,

    /// Authoritative only once the session is closed
    pub duration_sec: i32,

    /// Confidence of a video-derived close, unset for manual closes
    pub confidence: Option<f64>,

    pub last_heartbeat_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub close_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the session status as an enum
    pub fn session_status(&self) -> SessionStatus {
        SessionStatus::from(self.status.clone())
    }

    /// Get the session source as an enum
    pub fn session_source(&self) -> SessionSource {
        SessionSource::from(self.source.clone())
    }

    pub fn is_open(&self) -> bool {
        self.session_status() == SessionStatus::Open
    }

    /// Check if the session is in a terminal state (completion lock)
    pub fn is_finished(&self) -> bool {
        matches!(
            self.session_status(),
            SessionStatus::Closed | SessionStatus::Adjusted
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,

    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id"
    )]
    Course,

    #[sea_orm(has_many = "super::notification_log::Entity")]
    NotificationLogs,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
}

impl Related<super::notification_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NotificationLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
