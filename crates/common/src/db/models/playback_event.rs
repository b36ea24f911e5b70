//! Video playback event entity
//!
//! Immutable, append-only facts produced by the external player
//! collector. `position_sec` is the playhead position at the event; for
//! SEEK events it is the seek target.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Playback event type enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEventType {
    Play,
    Pause,
    Ended,
    Heartbeat,
    RateChange,
    Seek,
}

impl From<String> for PlaybackEventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "play" => PlaybackEventType::Play,
            "pause" => PlaybackEventType::Pause,
            "ended" => PlaybackEventType::Ended,
            "heartbeat" => PlaybackEventType::Heartbeat,
            "rate_change" => PlaybackEventType::RateChange,
            "seek" => PlaybackEventType::Seek,
            _ => PlaybackEventType::Heartbeat,
        }
    }
}

impl From<PlaybackEventType> for String {
    fn from(kind: PlaybackEventType) -> Self {
        match kind {
            PlaybackEventType::Play => "play".to_string(),
            PlaybackEventType::Pause => "pause".to_string(),
            PlaybackEventType::Ended => "ended".to_string(),
            PlaybackEventType::Heartbeat => "heartbeat".to_string(),
            PlaybackEventType::RateChange => "rate_change".to_string(),
            PlaybackEventType::Seek => "seek".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "playback_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    pub course_id: Uuid,

    /// External player's video identifier
    #[sea_orm(column_type = "Text")]
    pub video_id: String,

    #[sea_orm(column_type = "Text")]
    pub event_type: String,

    pub event_time: DateTimeWithTimeZone,

    pub position_sec: f64,

    pub playback_rate: Option<f64>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the event type as an enum
    pub fn kind(&self) -> PlaybackEventType {
        PlaybackEventType::from(self.event_type.clone())
    }

    /// Playback rate with the 1.0 default applied
    pub fn effective_rate(&self) -> f64 {
        self.playback_rate.unwrap_or(1.0)
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
