//! Notification policy entity
//!
//! At most one policy may exist per (scope, course-or-user) combination;
//! `global` scope allows at most one record per tenant.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Policy scope enum, in resolution priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    User,
    Course,
    Global,
}

impl From<String> for PolicyScope {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => PolicyScope::User,
            "course" => PolicyScope::Course,
            "global" => PolicyScope::Global,
            _ => PolicyScope::Global,
        }
    }
}

impl From<PolicyScope> for String {
    fn from(scope: PolicyScope) -> Self {
        match scope {
            PolicyScope::User => "user".to_string(),
            PolicyScope::Course => "course".to_string(),
            PolicyScope::Global => "global".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_policies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub scope: String,

    /// Populated only for course-scope policies
    pub course_id: Option<Uuid>,

    /// Populated only for user-scope policies
    pub user_id: Option<Uuid>,

    /// Minutes of heartbeat silence before the first notification
    pub first_notify_after_min: i32,

    /// Hours between repeat notifications
    pub repeat_interval_hours: i32,

    /// Days after which repeats stop
    pub max_repeat_days: i32,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the policy scope as an enum
    pub fn policy_scope(&self) -> PolicyScope {
        PolicyScope::from(self.scope.clone())
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
