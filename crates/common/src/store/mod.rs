//! Attendance store abstraction
//!
//! All engine and job data access goes through [`AttendanceStore`].
//! Two implementations exist: a transactional Postgres store for
//! production and an in-memory store for tests. The one contended
//! operation is [`AttendanceStore::check_in_or_get`], which must be a
//! single atomic read-modify-write so that two simultaneous check-ins
//! for the same (user, course) converge on one session.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::db::models::{
    AttendanceSession, Course, Enrollment, NotificationLog, NotificationPolicy, PlaybackEvent,
    PolicyScope, Tenant, WatchSession,
};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of the atomic check-in primitive
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub session: AttendanceSession,
    /// True when an open session for the exact (user, course) pair
    /// already existed and was returned instead of created
    pub is_existing: bool,
}

/// Data access contract for the attendance engine and batch jobs
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Backend connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>>;

    // ------------------------------------------------------------------
    // Courses and enrollments
    // ------------------------------------------------------------------

    async fn find_course(&self, tenant_id: Uuid, course_id: Uuid) -> Result<Option<Course>>;

    async fn find_active_enrollment(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>>;

    // ------------------------------------------------------------------
    // Attendance sessions
    // ------------------------------------------------------------------

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceSession>>;

    /// Find the user's open session in any course
    async fn find_open_session_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<AttendanceSession>>;

    /// Find the user's open session in one specific course
    async fn find_open_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>>;

    /// Find a closed or adjusted session for a (user, course) pair.
    /// Presence of one acts as the completion lock for that pair.
    async fn find_finished_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>>;

    async fn list_open_sessions(&self, tenant_id: Uuid) -> Result<Vec<AttendanceSession>>;

    async fn update_session(&self, session: AttendanceSession) -> Result<AttendanceSession>;

    async fn delete_session(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool>;

    /// Atomic check-in primitive: inside one transaction, return the
    /// existing open session for (user, course) if present, otherwise
    /// create a new open session with start_time = now. Re-validates
    /// the cross-course and completion-lock invariants under the
    /// transaction as a race backstop.
    async fn check_in_or_get(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CheckIn>;

    // ------------------------------------------------------------------
    // Notification policies and logs
    // ------------------------------------------------------------------

    /// Find the active policy at one scope, if any. Inactive policies
    /// are treated as absent.
    async fn find_active_policy(
        &self,
        tenant_id: Uuid,
        scope: PolicyScope,
        course_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<Option<NotificationPolicy>>;

    /// List logs for a session, most recent first
    async fn list_notification_logs(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<NotificationLog>>;

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog>;

    // ------------------------------------------------------------------
    // Playback events and watch sessions
    // ------------------------------------------------------------------

    /// List playback events with event_time >= since, in time order
    async fn list_playback_events_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<PlaybackEvent>>;

    async fn find_watch_session_in_progress(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        video_id: &str,
    ) -> Result<Option<WatchSession>>;

    async fn insert_watch_session(&self, watch: WatchSession) -> Result<WatchSession>;

    async fn update_watch_session(&self, watch: WatchSession) -> Result<WatchSession>;

    /// Completed watch sessions not yet used to close an attendance
    /// session, updated within the trailing window
    async fn list_completed_unclosed_watch_sessions(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<WatchSession>>;
}
