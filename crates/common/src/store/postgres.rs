//! Postgres attendance store
//!
//! SeaORM-backed implementation. Reads go to the replica when one is
//! configured; every mutation goes to the primary. The check-in
//! primitive runs inside a transaction so the invariant re-checks and
//! the insert are atomic.

use super::{AttendanceStore, CheckIn};
use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

/// Postgres store implementation
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

/// ActiveModel with every session field marked for write
fn session_active(session: AttendanceSession) -> AttendanceSessionActiveModel {
    AttendanceSessionActiveModel {
        id: Set(session.id),
        tenant_id: Set(session.tenant_id),
        user_id: Set(session.user_id),
        course_id: Set(session.course_id),
        status: Set(session.status),
        source: Set(session.source),
        start_time: Set(session.start_time),
        end_time: Set(session.end_time),
        duration_sec: Set(session.duration_sec),
        confidence: Set(session.confidence),
        last_heartbeat_at: Set(session.last_heartbeat_at),
        close_reason: Set(session.close_reason),
        created_at: Set(session.created_at),
        updated_at: Set(session.updated_at),
    }
}

/// ActiveModel with every watch-session field marked for write
fn watch_active(watch: WatchSession) -> WatchSessionActiveModel {
    WatchSessionActiveModel {
        id: Set(watch.id),
        tenant_id: Set(watch.tenant_id),
        user_id: Set(watch.user_id),
        course_id: Set(watch.course_id),
        video_id: Set(watch.video_id),
        status: Set(watch.status),
        start_time: Set(watch.start_time),
        end_time: Set(watch.end_time),
        watched_ranges: Set(watch.watched_ranges),
        coverage_ratio: Set(watch.coverage_ratio),
        normal_speed_ratio: Set(watch.normal_speed_ratio),
        session_closed_at: Set(watch.session_closed_at),
        created_at: Set(watch.created_at),
        updated_at: Set(watch.updated_at),
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Tenant Operations
    // ========================================================================

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        TenantEntity::find()
            .filter(TenantColumn::IsActive.eq(true))
            .order_by_asc(TenantColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Course / Enrollment Operations
    // ========================================================================

    async fn find_course(&self, tenant_id: Uuid, course_id: Uuid) -> Result<Option<Course>> {
        CourseEntity::find_by_id(course_id)
            .filter(CourseColumn::TenantId.eq(tenant_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_active_enrollment(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>> {
        EnrollmentEntity::find()
            .filter(EnrollmentColumn::TenantId.eq(tenant_id))
            .filter(EnrollmentColumn::UserId.eq(user_id))
            .filter(EnrollmentColumn::CourseId.eq(course_id))
            .filter(EnrollmentColumn::IsActive.eq(true))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Attendance Session Operations
    // ========================================================================

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        AttendanceSessionEntity::find_by_id(session_id)
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_open_session_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::UserId.eq(user_id))
            .filter(AttendanceSessionColumn::Status.eq("open"))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_open_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::UserId.eq(user_id))
            .filter(AttendanceSessionColumn::CourseId.eq(course_id))
            .filter(AttendanceSessionColumn::Status.eq("open"))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_finished_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::UserId.eq(user_id))
            .filter(AttendanceSessionColumn::CourseId.eq(course_id))
            .filter(AttendanceSessionColumn::Status.is_in(["closed", "adjusted"]))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_open_sessions(&self, tenant_id: Uuid) -> Result<Vec<AttendanceSession>> {
        AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::Status.eq("open"))
            .order_by_asc(AttendanceSessionColumn::StartTime)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_session(&self, session: AttendanceSession) -> Result<AttendanceSession> {
        session_active(session)
            .update(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete_session(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool> {
        let result = AttendanceSessionEntity::delete_many()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::Id.eq(session_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn check_in_or_get(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CheckIn> {
        let txn = self.write_conn().begin().await?;

        // Re-check the completion lock and cross-course invariant under
        // the transaction; the engine's preflight checks can race.
        let finished = AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::UserId.eq(user_id))
            .filter(AttendanceSessionColumn::CourseId.eq(course_id))
            .filter(AttendanceSessionColumn::Status.is_in(["closed", "adjusted"]))
            .one(&txn)
            .await?;
        if finished.is_some() {
            txn.rollback().await?;
            return Err(AppError::AlreadyCompleted);
        }

        let open = AttendanceSessionEntity::find()
            .filter(AttendanceSessionColumn::TenantId.eq(tenant_id))
            .filter(AttendanceSessionColumn::UserId.eq(user_id))
            .filter(AttendanceSessionColumn::Status.eq("open"))
            .one(&txn)
            .await?;

        if let Some(open) = open {
            if open.course_id == course_id {
                txn.commit().await?;
                return Ok(CheckIn {
                    session: open,
                    is_existing: true,
                });
            }
            let open_course_id = open.course_id.to_string();
            txn.rollback().await?;
            return Err(AppError::SessionConflict { open_course_id });
        }

        let session = AttendanceSessionActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            user_id: Set(user_id),
            course_id: Set(course_id),
            status: Set(String::from(SessionStatus::Open)),
            source: Set(String::from(SessionSource::Manual)),
            start_time: Set(now.into()),
            end_time: Set(None),
            duration_sec: Set(0),
            confidence: Set(None),
            last_heartbeat_at: Set(Some(now.into())),
            close_reason: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let session = session.insert(&txn).await?;
        txn.commit().await?;

        Ok(CheckIn {
            session,
            is_existing: false,
        })
    }

    // ========================================================================
    // Notification Policy / Log Operations
    // ========================================================================

    async fn find_active_policy(
        &self,
        tenant_id: Uuid,
        scope: PolicyScope,
        course_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<Option<NotificationPolicy>> {
        let mut query = NotificationPolicyEntity::find()
            .filter(NotificationPolicyColumn::TenantId.eq(tenant_id))
            .filter(NotificationPolicyColumn::Scope.eq(String::from(scope)))
            .filter(NotificationPolicyColumn::IsActive.eq(true));

        if let Some(course_id) = course_id {
            query = query.filter(NotificationPolicyColumn::CourseId.eq(course_id));
        }
        if let Some(user_id) = user_id {
            query = query.filter(NotificationPolicyColumn::UserId.eq(user_id));
        }

        query.one(self.read_conn()).await.map_err(Into::into)
    }

    async fn list_notification_logs(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<NotificationLog>> {
        NotificationLogEntity::find()
            .filter(NotificationLogColumn::TenantId.eq(tenant_id))
            .filter(NotificationLogColumn::SessionId.eq(session_id))
            .order_by_desc(NotificationLogColumn::SentAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_notification_log(&self, log: NotificationLog) -> Result<NotificationLog> {
        let log = NotificationLogActiveModel {
            id: Set(log.id),
            tenant_id: Set(log.tenant_id),
            session_id: Set(log.session_id),
            user_id: Set(log.user_id),
            template: Set(log.template),
            sent_at: Set(log.sent_at),
        };

        log.insert(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Playback / Watch Session Operations
    // ========================================================================

    async fn list_playback_events_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<PlaybackEvent>> {
        PlaybackEventEntity::find()
            .filter(PlaybackEventColumn::TenantId.eq(tenant_id))
            .filter(PlaybackEventColumn::EventTime.gte(since))
            .order_by_asc(PlaybackEventColumn::EventTime)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_watch_session_in_progress(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
        video_id: &str,
    ) -> Result<Option<WatchSession>> {
        WatchSessionEntity::find()
            .filter(WatchSessionColumn::TenantId.eq(tenant_id))
            .filter(WatchSessionColumn::UserId.eq(user_id))
            .filter(WatchSessionColumn::CourseId.eq(course_id))
            .filter(WatchSessionColumn::VideoId.eq(video_id))
            .filter(WatchSessionColumn::Status.eq("in_progress"))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_watch_session(&self, watch: WatchSession) -> Result<WatchSession> {
        watch_active(watch)
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_watch_session(&self, watch: WatchSession) -> Result<WatchSession> {
        watch_active(watch)
            .update(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_completed_unclosed_watch_sessions(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<WatchSession>> {
        WatchSessionEntity::find()
            .filter(WatchSessionColumn::TenantId.eq(tenant_id))
            .filter(WatchSessionColumn::Status.eq("completed"))
            .filter(WatchSessionColumn::SessionClosedAt.is_null())
            .filter(WatchSessionColumn::UpdatedAt.gte(since))
            .order_by_asc(WatchSessionColumn::UpdatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}
