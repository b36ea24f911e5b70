//! In-memory attendance store
//!
//! Backs engine and job tests. A single mutex spans every operation,
//! so `check_in_or_get` gets the same all-or-nothing behavior the
//! Postgres store gets from a transaction.

use super::{AttendanceStore, CheckIn};
use crate::db::models::{
    AttendanceSession, Course, Enrollment, NotificationLog, NotificationPolicy, PlaybackEvent,
    PlaybackEventType, PolicyScope, SessionSource, SessionStatus, Tenant, WatchSession,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    tenants: Vec<Tenant>,
    courses: Vec<Course>,
    enrollments: Vec<Enrollment>,
    sessions: Vec<AttendanceSession>,
    policies: Vec<NotificationPolicy>,
    logs: Vec<NotificationLog>,
    events: Vec<PlaybackEvent>,
    watch_sessions: Vec<WatchSession>,
}

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Seed helpers
    // ------------------------------------------------------------------

    pub async fn seed_tenant(&self, name: &str) -> Tenant {
        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active: true,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.inner.lock().await.tenants.push(tenant.clone());
        tenant
    }

    pub async fn seed_course(
        &self,
        tenant_id: Uuid,
        title: &str,
        required_watch_min: i32,
    ) -> Course {
        let now = Utc::now();
        let course = Course {
            id: Uuid::new_v4(),
            tenant_id,
            title: title.to_string(),
            required_watch_min,
            is_enabled: true,
            is_visible: true,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.inner.lock().await.courses.push(course.clone());
        course
    }

    /// Update a seeded course in place (e.g. to disable it)
    pub async fn replace_course(&self, course: Course) {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.courses.iter_mut().find(|c| c.id == course.id) {
            *existing = course;
        }
    }

    pub async fn seed_enrollment(&self, tenant_id: Uuid, user_id: Uuid, course_id: Uuid) {
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            course_id,
            is_active: true,
            created_at: Utc::now().into(),
        };
        self.inner.lock().await.enrollments.push(enrollment);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_policy(
        &self,
        tenant_id: Uuid,
        scope: PolicyScope,
        course_id: Option<Uuid>,
        user_id: Option<Uuid>,
        first_notify_after_min: i32,
        repeat_interval_hours: i32,
        max_repeat_days: i32,
        is_active: bool,
    ) -> NotificationPolicy {
        let now = Utc::now();
        let policy = NotificationPolicy {
            id: Uuid::new_v4(),
            tenant_id,
            scope: String::from(scope),
            course_id,
            user_id,
            first_notify_after_min,
            repeat_interval_hours,
            max_repeat_days,
            is_active,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.inner.lock().await.policies.push(policy.clone());
        policy
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_event(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        video_id: &str,
        kind: PlaybackEventType,
        event_time: DateTime<Utc>,
        position_sec: f64,
        playback_rate: Option<f64>,
    ) {
        let event = PlaybackEvent {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            course_id,
            video_id: video_id.to_string(),
            event_type: String::from(kind),
            event_time: event_time.into(),
            position_sec,
            playback_rate,
            created_at: Utc::now().into(),
        };
        self.inner.lock().await.events.push(event);
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tenants
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn find_course(&self, tenant_id: Uuid, course_id: Uuid) -> Result<Option<Course>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .courses
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.id == course_id)
            .cloned())
    }

    async fn find_active_enrollment(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .enrollments
            .iter()
            .find(|e| {
                e.tenant_id == tenant_id
                    && e.user_id == user_id
                    && e.course_id == course_id
                    && e.is_active
            })
            .cloned())
    }

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == session_id)
            .cloned())
    }

    async fn find_open_session_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.user_id == user_id && s.is_open())
            .cloned())
    }

    async fn find_open_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.user_id == user_id
                    && s.course_id == course_id
                    && s.is_open()
            })
            .cloned())
    }

    async fn find_finished_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.user_id == user_id
                    && s.course_id == course_id
                    && s.is_finished()
            })
            .cloned())
    }

    async fn list_open_sessions(&self, tenant_id: Uuid) -> Result<Vec<AttendanceSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.is_open())
            .cloned()
            .collect())
    }

    async fn update_session(&self, session: AttendanceSession) -> Result<AttendanceSession> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or_else(|| AppError::SessionNotFound {
                id: session.id.to_string(),
            })?;
        *existing = session.clone();
        Ok(session)
    }

    async fn delete_session(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|s| !(s.tenant_id == tenant_id && s.id == session_id));
        Ok(inner.sessions.len() < before)
    }

    async fn check_in_or_get(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CheckIn> {
        // One lock guard across all checks and the insert; this is the
        // in-memory equivalent of the Postgres transaction.
        let mut inner = self.inner.lock().await;

        if inner.sessions.iter().any(|s| {
            s.tenant_id == tenant_id
                && s.user_id == user_id
                && s.course_id == course_id
                && s.is_finished()
        }) {
            return Err(AppError::AlreadyCompleted);
        }

        if let Some(open) = inner
            .sessions
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.user_id == user_id && s.is_open())
        {
            if open.course_id == course_id {
                return Ok(CheckIn {
                    session: open.clone(),
                    is_existing: true,
                });
            }
            return Err(AppError::SessionConflict {
                open_course_id: open.course_id.to_string(),
            });
        }

        let session = AttendanceSession {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            course_id,
            status: String::from(SessionStatus::Open),
            source: String::from(SessionSource::Manual),
            start_time: now.into(),
            end_time: None,
            duration_sec: 0,
            confidence: None,
            last_heartbeat_at: Some(now.into()),
            close_reason: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        inner.sessions.push(session.clone());

        Ok(CheckIn {
            session,
            is_existing: false,
        })
    }

    async fn find_active_policy(
        &self,
        tenant_id: Uuid,
        scope: PolicyScope,
        course_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<Option<NotificationPolicy>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .policies
            .iter()
            .find(|p| {
                p.tenant_id == tenant_id
                    && p.policy_scope() == scope
                    && p.is_active
                    && (course_id.is_none() || p.course_id == course_id)
                    && (user_id.is_none() || p.user_id == user_id)
            })
            .cloned())
    }

    async fn list_notification_logs(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<NotificationLog>> {
        let inner = self.inner.lock().await;
        let mut logs: Vec<NotificationLog> = inner
            .logs
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.session_id == session_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(logs)
    }

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog> {
        self.inner.lock().await.logs.push(log.clone());
        Ok(log)
    }

    async fn list_playback_events_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<PlaybackEvent>> {
        let inner = self.inner.lock().await;
        let mut events: Vec<PlaybackEvent> = inner
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.event_time >= since)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.event_time.cmp(&b.event_time));
        Ok(events)
    }

    async fn find_watch_session_in_progress(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        video_id: &str,
    ) -> Result<Option<WatchSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .watch_sessions
            .iter()
            .find(|w| {
                w.tenant_id == tenant_id
                    && w.user_id == user_id
                    && w.course_id == course_id
                    && w.video_id == video_id
                    && !w.is_completed()
            })
            .cloned())
    }

    async fn insert_watch_session(&self, watch: WatchSession) -> Result<WatchSession> {
        self.inner.lock().await.watch_sessions.push(watch.clone());
        Ok(watch)
    }

    async fn update_watch_session(&self, watch: WatchSession) -> Result<WatchSession> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .watch_sessions
            .iter_mut()
            .find(|w| w.id == watch.id)
            .ok_or_else(|| AppError::NotFound {
                resource_type: "watch_session".to_string(),
                id: watch.id.to_string(),
            })?;
        *existing = watch.clone();
        Ok(watch)
    }

    async fn list_completed_unclosed_watch_sessions(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<WatchSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .watch_sessions
            .iter()
            .filter(|w| {
                w.tenant_id == tenant_id
                    && w.is_completed()
                    && w.session_closed_at.is_none()
                    && w.updated_at >= since
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_in_or_get_is_idempotent() {
        let store = MemoryStore::new();
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();
        let course = store.seed_course(tenant.id, "Algebra", 30).await;

        let first = store
            .check_in_or_get(tenant.id, user, course.id, Utc::now())
            .await
            .unwrap();
        assert!(!first.is_existing);

        let second = store
            .check_in_or_get(tenant.id, user, course.id, Utc::now())
            .await
            .unwrap();
        assert!(second.is_existing);
        assert_eq!(first.session.id, second.session.id);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_check_in_rejects_cross_course_open_session() {
        let store = MemoryStore::new();
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();
        let algebra = store.seed_course(tenant.id, "Algebra", 30).await;
        let physics = store.seed_course(tenant.id, "Physics", 30).await;

        store
            .check_in_or_get(tenant.id, user, algebra.id, Utc::now())
            .await
            .unwrap();

        let result = store
            .check_in_or_get(tenant.id, user, physics.id, Utc::now())
            .await;
        assert!(matches!(result, Err(AppError::SessionConflict { .. })));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_check_in_respects_completion_lock() {
        let store = MemoryStore::new();
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();
        let course = store.seed_course(tenant.id, "Algebra", 30).await;

        let check_in = store
            .check_in_or_get(tenant.id, user, course.id, Utc::now())
            .await
            .unwrap();

        let mut session = check_in.session;
        session.status = String::from(SessionStatus::Closed);
        session.end_time = Some(Utc::now().into());
        store.update_session(session.clone()).await.unwrap();

        let result = store
            .check_in_or_get(tenant.id, user, course.id, Utc::now())
            .await;
        assert!(matches!(result, Err(AppError::AlreadyCompleted)));

        // Deleting the finished session lifts the lock
        assert!(store.delete_session(tenant.id, session.id).await.unwrap());
        let retry = store
            .check_in_or_get(tenant.id, user, course.id, Utc::now())
            .await
            .unwrap();
        assert!(!retry.is_existing);
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_converge_on_one_session() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();
        let course = store.seed_course(tenant.id, "Algebra", 30).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .check_in_or_get(tenant.id, user, course.id, Utc::now())
                    .await
            }));
        }

        let mut created = 0;
        let mut ids = Vec::new();
        for handle in handles {
            let check_in = handle.await.unwrap().unwrap();
            if !check_in.is_existing {
                created += 1;
            }
            ids.push(check_in.session.id);
        }

        assert_eq!(created, 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.session_count().await, 1);
    }
}
