//! Video watch session entity
//!
//! Derived aggregate keyed by (user, course, video), rebuilt every
//! aggregation run from the trailing event window. `session_closed_at`
//! is set exactly once, when the aggregate has been used to close a
//! matching attendance session; it is the idempotency marker that
//! prevents duplicate closures across job runs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Watch session status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    InProgress,
    Completed,
}

impl From<String> for WatchStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in_progress" => WatchStatus::InProgress,
            "completed" => WatchStatus::Completed,
            _ => WatchStatus::InProgress,
        }
    }
}

impl From<WatchStatus> for String {
    fn from(status: WatchStatus) -> Self {
        match status {
            WatchStatus::InProgress => "in_progress".to_string(),
            WatchStatus::Completed => "completed".to_string(),
        }
    }
}

/// A derived interval of positions believed watched at a given speed
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchedRange {
    pub start: f64,
    pub end: f64,
    pub rate: f64,
}

impl WatchedRange {
    pub fn length(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "watch_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    pub course_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub video_id: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: DateTimeWithTimeZone,

    #[sea_orm(column_type = "JsonBinary")]
    pub watched_ranges: Json,

    pub coverage_ratio: f64,

    pub normal_speed_ratio: f64,

    pub session_closed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the watch status as an enum
    pub fn watch_status(&self) -> WatchStatus {
        WatchStatus::from(self.status.clone())
    }

    pub fn is_completed(&self) -> bool {
        self.watch_status() == WatchStatus::Completed
    }

    /// Decode the stored range list
    pub fn ranges(&self) -> Result<Vec<WatchedRange>, serde_json::Error> {
        serde_json::from_value(self.watched_ranges.clone())
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
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
