//! SeaORM entity models
//!
//! Database entities for Rollcall

mod attendance_session;
mod course;
mod enrollment;
mod notification_log;
mod notification_policy;
mod playback_event;
mod tenant;
mod watch_session;

pub use tenant::{
    Entity as TenantEntity,
    Model as Tenant,
    ActiveModel as TenantActiveModel,
    Column as TenantColumn,
};

pub use course::{
    Entity as CourseEntity,
    Model as Course,
    ActiveModel as CourseActiveModel,
    Column as CourseColumn,
};

pub use enrollment::{
    Entity as EnrollmentEntity,
    Model as Enrollment,
    ActiveModel as EnrollmentActiveModel,
    Column as EnrollmentColumn,
};

pub use attendance_session::{
    Entity as AttendanceSessionEntity,
    Model as AttendanceSession,
    ActiveModel as AttendanceSessionActiveModel,
    Column as AttendanceSessionColumn,
    SessionSource,
    SessionStatus,
};

pub use notification_policy::{
    Entity as NotificationPolicyEntity,
    Model as NotificationPolicy,
    ActiveModel as NotificationPolicyActiveModel,
    Column as NotificationPolicyColumn,
    PolicyScope,
};

pub use notification_log::{
    Entity as NotificationLogEntity,
    Model as NotificationLog,
    ActiveModel as NotificationLogActiveModel,
    Column as NotificationLogColumn,
};

pub use playback_event::{
    Entity as PlaybackEventEntity,
    Model as PlaybackEvent,
    ActiveModel as PlaybackEventActiveModel,
    Column as PlaybackEventColumn,
    PlaybackEventType,
};

pub use watch_session::{
    Entity as WatchSessionEntity,
    Model as WatchSession,
    ActiveModel as WatchSessionActiveModel,
    Column as WatchSessionColumn,
    WatchStatus,
    WatchedRange,
};
