//! Session state machine
//!
//! Validates and executes check-in, heartbeat, check-out,
//! self-checkout, admin-close, auto-close, video-close, and delete
//! transitions against the attendance store. Interactive operations
//! fail fast on the first violated precondition; the one contended
//! operation (check-in) defers its final invariant checks to the
//! store's atomic primitive.

use chrono::{DateTime, Duration, Utc};
use rollcall_common::clock::Clock;
use rollcall_common::db::models::{
    AttendanceSession, Course, NotificationLog, SessionSource, SessionStatus,
};
use rollcall_common::errors::{AppError, Result};
use rollcall_common::metrics::{record_check_in, record_session_closed};
use rollcall_common::store::{AttendanceStore, CheckIn};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How far into the future a self-checkout end time may lie
pub const SELF_CHECKOUT_TOLERANCE_MIN: i64 = 5;

/// Payload for the self-checkout form: what the learner may submit
#[derive(Debug, Clone)]
pub struct SelfCheckoutInfo {
    pub session: AttendanceSession,
    /// Whether a checkout notification has been sent (precondition)
    pub notified: bool,
    /// Earliest acceptable end time (start + required watch minutes)
    pub earliest_end_time: DateTime<Utc>,
    /// Latest acceptable end time (now + tolerance)
    pub latest_end_time: DateTime<Utc>,
}

/// The attendance session state machine
pub struct AttendanceEngine {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl AttendanceEngine {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Check a learner in to a course, or return their existing open
    /// session for the same course (idempotent repeat check-in).
    pub async fn check_in(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<CheckIn> {
        let course = self
            .store
            .find_course(tenant_id, course_id)
            .await?
            .ok_or_else(|| AppError::CourseNotFound {
                id: course_id.to_string(),
            })?;

        if !course.is_available() {
            return Err(AppError::CourseNotAvailable {
                id: course_id.to_string(),
            });
        }

        self.store
            .find_active_enrollment(tenant_id, user_id, course_id)
            .await?
            .ok_or_else(|| AppError::NotEnrolled {
                course_id: course_id.to_string(),
            })?;

        // Preflight checks; the store re-validates both under its
        // transaction, this just fails fast for the common case.
        if let Some(open) = self
            .store
            .find_open_session_for_user(tenant_id, user_id)
            .await?
        {
            if open.course_id != course_id {
                return Err(AppError::SessionConflict {
                    open_course_id: open.course_id.to_string(),
                });
            }
        }

        if self
            .store
            .find_finished_session(tenant_id, user_id, course_id)
            .await?
            .is_some()
        {
            return Err(AppError::AlreadyCompleted);
        }

        let now = self.clock.now();
        let check_in = self
            .store
            .check_in_or_get(tenant_id, user_id, course_id, now)
            .await?;

        let outcome = if check_in.is_existing { "existing" } else { "created" };
        record_check_in(outcome);
        info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            course_id = %course_id,
            session_id = %check_in.session.id,
            is_existing = check_in.is_existing,
            "Check-in"
        );

        Ok(check_in)
    }

    /// Refresh an open session's liveness timestamp
    pub async fn heartbeat(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<AttendanceSession> {
        let mut session = self.owned_open_session(tenant_id, session_id, user_id).await?;

        let now = self.clock.now();
        session.last_heartbeat_at = Some(now.into());
        session.updated_at = now.into();

        self.store.update_session(session).await
    }

    /// Learner-initiated check-out at the current time
    pub async fn check_out(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<AttendanceSession> {
        let session = self.owned_open_session(tenant_id, session_id, user_id).await?;
        let course = self.session_course(&session).await?;

        let now = self.clock.now();
        let required = Duration::minutes(i64::from(course.required_watch_min));
        let elapsed = now.signed_duration_since(session.start_time);
        if elapsed < required {
            return Err(AppError::NotEnoughTime {
                remaining_sec: (required - elapsed).num_seconds(),
            });
        }

        self.close_session(session, now, SessionSource::Manual, None, "check_out")
            .await
    }

    /// What the self-checkout form needs: whether the precondition
    /// notification exists and the acceptable end-time window.
    pub async fn self_checkout_info(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<SelfCheckoutInfo> {
        let session = self.owned_open_session(tenant_id, session_id, user_id).await?;
        let course = self.session_course(&session).await?;

        let logs = self
            .store
            .list_notification_logs(tenant_id, session_id)
            .await?;

        let start: DateTime<Utc> = session.start_time.into();
        let earliest = start + Duration::minutes(i64::from(course.required_watch_min));
        let latest = self.clock.now() + Duration::minutes(SELF_CHECKOUT_TOLERANCE_MIN);

        Ok(SelfCheckoutInfo {
            session,
            notified: !logs.is_empty(),
            earliest_end_time: earliest,
            latest_end_time: latest,
        })
    }

    /// Learner-initiated close after a forgot-to-check-out
    /// notification, with a caller-supplied end time.
    pub async fn self_checkout(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
        requested_end: DateTime<Utc>,
    ) -> Result<AttendanceSession> {
        let session = self.owned_open_session(tenant_id, session_id, user_id).await?;
        let course = self.session_course(&session).await?;

        let logs = self
            .store
            .list_notification_logs(tenant_id, session_id)
            .await?;
        if logs.is_empty() {
            return Err(AppError::NotificationNotSent);
        }

        let now = self.clock.now();
        let start: DateTime<Utc> = session.start_time.into();

        if requested_end < start {
            return Err(AppError::InvalidEndTime {
                message: "end time precedes session start".to_string(),
            });
        }
        if requested_end > now + Duration::minutes(SELF_CHECKOUT_TOLERANCE_MIN) {
            return Err(AppError::InvalidEndTime {
                message: "end time too far in the future".to_string(),
            });
        }

        let earliest = start + Duration::minutes(i64::from(course.required_watch_min));
        if requested_end < earliest {
            return Err(AppError::NotEnoughTime {
                remaining_sec: earliest.signed_duration_since(requested_end).num_seconds(),
            });
        }

        self.close_session(
            session,
            requested_end,
            SessionSource::Manual,
            None,
            "self_checkout",
        )
        .await
    }

    /// Administrative close; no ownership or elapsed-time checks
    pub async fn admin_close(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<AttendanceSession> {
        let session = self.open_session(tenant_id, session_id).await?;
        let end = end_time.unwrap_or_else(|| self.clock.now());

        self.close_session(session, end, SessionSource::Manual, None, "admin_close")
            .await
    }

    /// Auto-close sweep entry point: identical to admin-close but
    /// attributed to the system actor.
    pub async fn force_close(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<AttendanceSession> {
        let session = self.open_session(tenant_id, session_id).await?;
        let now = self.clock.now();

        self.close_session(session, now, SessionSource::Manual, None, "auto_close")
            .await
    }

    /// Close an attendance session from a completed video watch
    /// aggregate, with video-derived attribution.
    pub async fn close_from_video(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        end_time: DateTime<Utc>,
        confidence: Option<f64>,
    ) -> Result<AttendanceSession> {
        let session = self.open_session(tenant_id, session_id).await?;

        self.close_session(session, end_time, SessionSource::Video, confidence, "video")
            .await
    }

    /// Administrative delete; lifts the completion lock for the
    /// session's (user, course) pair.
    pub async fn admin_delete(&self, tenant_id: Uuid, session_id: Uuid) -> Result<()> {
        let deleted = self.store.delete_session(tenant_id, session_id).await?;
        if !deleted {
            return Err(AppError::SessionNotFound {
                id: session_id.to_string(),
            });
        }

        info!(tenant_id = %tenant_id, session_id = %session_id, "Session deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn open_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<AttendanceSession> {
        let session = self
            .store
            .find_session(tenant_id, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        if !session.is_open() {
            return Err(AppError::SessionClosed {
                id: session_id.to_string(),
            });
        }

        Ok(session)
    }

    async fn owned_open_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<AttendanceSession> {
        let session = self
            .store
            .find_session(tenant_id, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        if session.user_id != user_id {
            return Err(AppError::NotSessionOwner {
                id: session_id.to_string(),
            });
        }
        if !session.is_open() {
            return Err(AppError::SessionClosed {
                id: session_id.to_string(),
            });
        }

        Ok(session)
    }

    async fn session_course(&self, session: &AttendanceSession) -> Result<Course> {
        self.store
            .find_course(session.tenant_id, session.course_id)
            .await?
            .ok_or_else(|| AppError::CourseNotFound {
                id: session.course_id.to_string(),
            })
    }

    async fn close_session(
        &self,
        mut session: AttendanceSession,
        end_time: DateTime<Utc>,
        source: SessionSource,
        confidence: Option<f64>,
        reason: &str,
    ) -> Result<AttendanceSession> {
        // Clamp protects against clock skew between end and start
        let duration_sec = end_time
            .signed_duration_since(session.start_time)
            .num_seconds()
            .max(0);

        session.status = String::from(SessionStatus::Closed);
        session.source = String::from(source);
        session.end_time = Some(end_time.into());
        session.duration_sec = duration_sec as i32;
        session.confidence = confidence;
        session.close_reason = Some(reason.to_string());
        session.updated_at = self.clock.now().into();

        let session = self.store.update_session(session).await?;

        record_session_closed(reason);
        info!(
            session_id = %session.id,
            reason = reason,
            duration_sec = session.duration_sec,
            "Session closed"
        );

        Ok(session)
    }
}

/// Build a checkout-reminder log row for a session
pub fn notification_log(session: &AttendanceSession, sent_at: DateTime<Utc>) -> NotificationLog {
    NotificationLog {
        id: Uuid::new_v4(),
        tenant_id: session.tenant_id,
        session_id: session.id,
        user_id: session.user_id,
        template: "checkout_reminder".to_string(),
        sent_at: sent_at.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_common::clock::ManualClock;
    use rollcall_common::db::models::{Course, Tenant};
    use rollcall_common::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        engine: AttendanceEngine,
        tenant: Tenant,
        course: Course,
        user: Uuid,
    }

    async fn fixture(required_watch_min: i32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap(),
        ));
        let engine = AttendanceEngine::new(store.clone(), clock.clone());

        let tenant = store.seed_tenant("acme").await;
        let course = store
            .seed_course(tenant.id, "Algebra", required_watch_min)
            .await;
        let user = Uuid::new_v4();
        store.seed_enrollment(tenant.id, user, course.id).await;

        Fixture {
            store,
            clock,
            engine,
            tenant,
            course,
            user,
        }
    }

    #[tokio::test]
    async fn test_check_in_heartbeat_check_out_scenario() {
        // Session opens at 10:00 with a 63-minute requirement
        let f = fixture(63).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        assert!(!check_in.is_existing);
        let session_id = check_in.session.id;

        // Heartbeat at 10:30 refreshes liveness
        f.clock.advance(Duration::minutes(30));
        let session = f
            .engine
            .heartbeat(f.tenant.id, session_id, f.user)
            .await
            .unwrap();
        let heartbeat_at: DateTime<Utc> = session.last_heartbeat_at.unwrap().into();
        assert_eq!(heartbeat_at, f.clock.now());

        // Check-out at 11:00 is 3 minutes early
        f.clock.advance(Duration::minutes(30));
        let err = f
            .engine
            .check_out(f.tenant.id, session_id, f.user)
            .await
            .unwrap_err();
        match err {
            AppError::NotEnoughTime { remaining_sec } => assert_eq!(remaining_sec, 180),
            other => panic!("unexpected error: {other}"),
        }

        // Check-out at 11:05 succeeds with a 65-minute duration
        f.clock.advance(Duration::minutes(5));
        let closed = f
            .engine
            .check_out(f.tenant.id, session_id, f.user)
            .await
            .unwrap();
        assert_eq!(closed.duration_sec, 3900);
        assert!(closed.is_finished());
        assert_eq!(closed.close_reason.as_deref(), Some("check_out"));
    }

    #[tokio::test]
    async fn test_repeat_check_in_returns_same_session() {
        let f = fixture(30).await;

        let first = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        let second = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();

        assert!(second.is_existing);
        assert_eq!(first.session.id, second.session.id);
        assert_eq!(f.store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_check_in_rejects_other_course_while_open() {
        let f = fixture(30).await;
        let physics = f.store.seed_course(f.tenant.id, "Physics", 30).await;
        f.store
            .seed_enrollment(f.tenant.id, f.user, physics.id)
            .await;

        f.engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();

        let err = f
            .engine
            .check_in(f.tenant.id, f.user, physics.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionConflict { .. }));
        assert_eq!(f.store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_check_in_requires_enrollment_and_availability() {
        let f = fixture(30).await;

        let stranger = Uuid::new_v4();
        let err = f
            .engine
            .check_in(f.tenant.id, stranger, f.course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotEnrolled { .. }));

        let mut course = f.course.clone();
        course.is_enabled = false;
        f.store.replace_course(course).await;

        let err = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CourseNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_completion_lock_and_delete() {
        let f = fixture(0).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        f.engine
            .check_out(f.tenant.id, check_in.session.id, f.user)
            .await
            .unwrap();

        let err = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyCompleted));

        // Administrative delete lifts the lock
        f.engine
            .admin_delete(f.tenant.id, check_in.session.id)
            .await
            .unwrap();
        let retry = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        assert!(!retry.is_existing);
    }

    #[tokio::test]
    async fn test_heartbeat_ownership_and_state_guards() {
        let f = fixture(0).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        let session_id = check_in.session.id;

        let err = f
            .engine
            .heartbeat(f.tenant.id, session_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotSessionOwner { .. }));

        f.engine
            .check_out(f.tenant.id, session_id, f.user)
            .await
            .unwrap();
        let err = f
            .engine
            .heartbeat(f.tenant.id, session_id, f.user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_duration_clamped_to_zero() {
        let f = fixture(30).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();

        // Admin close with an end time before the session started
        let before_start = f.clock.now() - Duration::hours(1);
        let closed = f
            .engine
            .admin_close(f.tenant.id, check_in.session.id, Some(before_start))
            .await
            .unwrap();
        assert_eq!(closed.duration_sec, 0);
    }

    #[tokio::test]
    async fn test_self_checkout_guards() {
        let f = fixture(60).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        let session = check_in.session;
        let start: DateTime<Utc> = session.start_time.into();

        // No notification yet
        let err = f
            .engine
            .self_checkout(f.tenant.id, session.id, f.user, start + Duration::hours(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotificationNotSent));

        let log = notification_log(&session, f.clock.now());
        f.store.insert_notification_log(log).await.unwrap();
        f.clock.advance(Duration::hours(2));

        // End time before session start
        let err = f
            .engine
            .self_checkout(f.tenant.id, session.id, f.user, start - Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidEndTime { .. }));

        // End time beyond the future tolerance
        let err = f
            .engine
            .self_checkout(
                f.tenant.id,
                session.id,
                f.user,
                f.clock.now() + Duration::minutes(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidEndTime { .. }));

        // End time inside the window but before the watch requirement
        let err = f
            .engine
            .self_checkout(
                f.tenant.id,
                session.id,
                f.user,
                start + Duration::minutes(30),
            )
            .await
            .unwrap_err();
        match err {
            AppError::NotEnoughTime { remaining_sec } => assert_eq!(remaining_sec, 1800),
            other => panic!("unexpected error: {other}"),
        }

        // Valid request closes at the requested time
        let requested = start + Duration::minutes(90);
        let closed = f
            .engine
            .self_checkout(f.tenant.id, session.id, f.user, requested)
            .await
            .unwrap();
        let end: DateTime<Utc> = closed.end_time.unwrap().into();
        assert_eq!(end, requested);
        assert_eq!(closed.duration_sec, 90 * 60);
        assert_eq!(closed.close_reason.as_deref(), Some("self_checkout"));
    }

    #[tokio::test]
    async fn test_self_checkout_info_reports_window() {
        let f = fixture(60).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        let session = check_in.session;
        let start: DateTime<Utc> = session.start_time.into();

        let info = f
            .engine
            .self_checkout_info(f.tenant.id, session.id, f.user)
            .await
            .unwrap();
        assert!(!info.notified);
        assert_eq!(info.earliest_end_time, start + Duration::minutes(60));
        assert_eq!(
            info.latest_end_time,
            f.clock.now() + Duration::minutes(SELF_CHECKOUT_TOLERANCE_MIN)
        );

        let log = notification_log(&session, f.clock.now());
        f.store.insert_notification_log(log).await.unwrap();
        let info = f
            .engine
            .self_checkout_info(f.tenant.id, session.id, f.user)
            .await
            .unwrap();
        assert!(info.notified);
    }

    #[tokio::test]
    async fn test_force_close_guards_open_state() {
        let f = fixture(0).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();
        let session_id = check_in.session.id;

        f.clock.advance(Duration::hours(50));
        let closed = f.engine.force_close(f.tenant.id, session_id).await.unwrap();
        assert_eq!(closed.close_reason.as_deref(), Some("auto_close"));

        // A second sweep must not close it again
        let err = f.engine.force_close(f.tenant.id, session_id).await.unwrap_err();
        assert!(matches!(err, AppError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_close_from_video_sets_attribution() {
        let f = fixture(0).await;

        let check_in = f
            .engine
            .check_in(f.tenant.id, f.user, f.course.id)
            .await
            .unwrap();

        let end = f.clock.now() + Duration::minutes(42);
        let closed = f
            .engine
            .close_from_video(f.tenant.id, check_in.session.id, end, Some(0.97))
            .await
            .unwrap();

        assert_eq!(closed.session_source(), SessionSource::Video);
        assert_eq!(closed.duration_sec, 42 * 60);
        assert_eq!(closed.confidence, Some(0.97));
        assert_eq!(closed.close_reason.as_deref(), Some("video"));
    }
}
