//! Watch worker processor
//!
//! Runs the two aggregation phases over a bounded trailing window:
//! first fold the window's playback events into watch-session
//! aggregates per (user, course, video), then reconcile completed
//! aggregates against open attendance sessions. `session_closed_at`
//! on the aggregate is the sole idempotency marker; once set, a
//! completion can never close a second attendance session.

use crate::ranges::{build_ranges, coverage, is_completed, merge_ranges};
use chrono::{DateTime, Duration, Utc};
use rollcall_common::clock::Clock;
use rollcall_common::db::models::{PlaybackEvent, Tenant, WatchSession, WatchStatus};
use rollcall_common::errors::Result;
use rollcall_common::metrics::record_aggregation_run;
use rollcall_common::store::AttendanceStore;
use rollcall_engine::AttendanceEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Aggregation worker configuration
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Trailing window of events to reprocess, in hours
    pub window_hours: i64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self { window_hours: 24 }
    }
}

/// One (user, course, video) event group
type GroupKey = (Uuid, Uuid, String);

/// Per-tenant breakdown of one run
#[derive(Debug, Clone, Serialize)]
pub struct TenantAggregationReport {
    pub tenant_id: Uuid,
    pub groups: u64,
    pub completed: u64,
    pub sessions_closed: u64,
    pub errors: Vec<String>,
}

impl TenantAggregationReport {
    fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            groups: 0,
            completed: 0,
            sessions_closed: 0,
            errors: Vec::new(),
        }
    }
}

/// Aggregate report of one run across all tenants
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationRunReport {
    pub groups: u64,
    pub completed: u64,
    pub sessions_closed: u64,
    pub errors: u64,
    pub tenants: Vec<TenantAggregationReport>,
}

/// Watch worker processor
pub struct AggregationProcessor {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    engine: AttendanceEngine,
    config: AggregateConfig,
}

impl AggregationProcessor {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        config: AggregateConfig,
    ) -> Self {
        Self {
            engine: AttendanceEngine::new(store.clone(), clock.clone()),
            store,
            clock,
            config,
        }
    }

    /// One full run across all active tenants
    pub async fn run(&self) -> Result<AggregationRunReport> {
        let started = Instant::now();
        let tenants = self.store.list_active_tenants().await?;

        let mut report = AggregationRunReport::default();
        for tenant in &tenants {
            let tenant_report = self.process_tenant(tenant).await;

            report.groups += tenant_report.groups;
            report.completed += tenant_report.completed;
            report.sessions_closed += tenant_report.sessions_closed;
            report.errors += tenant_report.errors.len() as u64;
            report.tenants.push(tenant_report);
        }

        let duration = started.elapsed().as_secs_f64();
        record_aggregation_run(
            duration,
            report.groups,
            report.completed,
            report.sessions_closed,
            report.errors,
        );
        info!(
            tenants = tenants.len(),
            groups = report.groups,
            completed = report.completed,
            sessions_closed = report.sessions_closed,
            errors = report.errors,
            duration_secs = duration,
            "Aggregation run complete"
        );

        Ok(report)
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn process_tenant(&self, tenant: &Tenant) -> TenantAggregationReport {
        let mut report = TenantAggregationReport::new(tenant.id);
        let now = self.clock.now();
        let since = now - Duration::hours(self.config.window_hours);

        // Phase one: fold the window's events into aggregates
        let events = match self.store.list_playback_events_since(tenant.id, since).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to list playback events");
                report.errors.push(format!("list events: {e}"));
                return report;
            }
        };

        for (key, group) in group_events(events) {
            report.groups += 1;
            match self.process_group(tenant.id, &key, &group, now).await {
                Ok(true) => report.completed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        user_id = %key.0,
                        course_id = %key.1,
                        video_id = %key.2,
                        error = %e,
                        "Group aggregation failed"
                    );
                    report.errors.push(format!(
                        "group ({}, {}, {}): {e}",
                        key.0, key.1, key.2
                    ));
                }
            }
        }

        // Phase two: close attendance sessions for completions not yet
        // reconciled, including ones left over from earlier runs.
        let pending = match self
            .store
            .list_completed_unclosed_watch_sessions(tenant.id, since)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to list completed watch sessions");
                report.errors.push(format!("list completions: {e}"));
                return report;
            }
        };

        for watch in pending {
            match self.reconcile(tenant.id, watch, now).await {
                Ok(true) => report.sessions_closed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                    report.errors.push(format!("reconcile: {e}"));
                }
            }
        }

        report
    }

    /// Fold one group's events and upsert its watch-session aggregate.
    /// Returns whether the aggregate is completed.
    async fn process_group(
        &self,
        tenant_id: Uuid,
        key: &GroupKey,
        events: &[PlaybackEvent],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (user_id, course_id, video_id) = key;

        let ranges = merge_ranges(build_ranges(events));
        let metrics = coverage(&ranges);
        let completed = is_completed(events);
        let status = if completed {
            WatchStatus::Completed
        } else {
            WatchStatus::InProgress
        };

        // Groups come from a non-empty event list
        let start_time = events
            .first()
            .map(|e| e.event_time)
            .unwrap_or_else(|| now.into());
        let end_time = events
            .last()
            .map(|e| e.event_time)
            .unwrap_or_else(|| now.into());

        let watched_ranges = serde_json::to_value(&ranges)?;

        let existing = self
            .store
            .find_watch_session_in_progress(tenant_id, *user_id, *course_id, video_id)
            .await?;

        match existing {
            Some(mut watch) => {
                // Overwrite the aggregate; session_closed_at is only
                // ever touched by reconciliation.
                watch.status = String::from(status);
                watch.start_time = start_time;
                watch.end_time = end_time;
                watch.watched_ranges = watched_ranges;
                watch.coverage_ratio = metrics.coverage_ratio;
                watch.normal_speed_ratio = metrics.normal_speed_ratio;
                watch.updated_at = now.into();
                self.store.update_watch_session(watch).await?;
            }
            None => {
                let watch = WatchSession {
                    id: Uuid::new_v4(),
                    tenant_id,
                    user_id: *user_id,
                    course_id: *course_id,
                    video_id: video_id.clone(),
                    status: String::from(status),
                    start_time,
                    end_time,
                    watched_ranges,
                    coverage_ratio: metrics.coverage_ratio,
                    normal_speed_ratio: metrics.normal_speed_ratio,
                    session_closed_at: None,
                    created_at: now.into(),
                    updated_at: now.into(),
                };
                self.store.insert_watch_session(watch).await?;
            }
        }

        Ok(completed)
    }

    /// Close the matching open attendance session for one completed
    /// aggregate and stamp the idempotency marker. Returns whether a
    /// session was closed.
    async fn reconcile(
        &self,
        tenant_id: Uuid,
        mut watch: WatchSession,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let open = self
            .store
            .find_open_session(tenant_id, watch.user_id, watch.course_id)
            .await?;

        let Some(session) = open else {
            // No attendance to close; leave the marker unset so a
            // later check-in can still be reconciled.
            return Ok(false);
        };

        self.engine
            .close_from_video(
                tenant_id,
                session.id,
                watch.end_time.into(),
                Some(watch.coverage_ratio),
            )
            .await?;

        watch.session_closed_at = Some(now.into());
        watch.updated_at = now.into();
        self.store.update_watch_session(watch).await?;

        Ok(true)
    }
}

/// Group events by (user, course, video), preserving both group
/// first-appearance order and time order within each group.
fn group_events(events: Vec<PlaybackEvent>) -> Vec<(GroupKey, Vec<PlaybackEvent>)> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<PlaybackEvent>> = HashMap::new();

    for event in events {
        let key = (event.user_id, event.course_id, event.video_id.clone());
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Vec::new()
        });
        group.push(event);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key).map(|group| (key.clone(), group)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_common::clock::ManualClock;
    use rollcall_common::db::models::{PlaybackEventType, SessionSource};
    use rollcall_common::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        processor: AggregationProcessor,
        engine: AttendanceEngine,
        tenant_id: Uuid,
        course_id: Uuid,
        user: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        ));
        let processor =
            AggregationProcessor::new(store.clone(), clock.clone(), AggregateConfig::default());
        let engine = AttendanceEngine::new(store.clone(), clock.clone());

        let tenant = store.seed_tenant("acme").await;
        let course = store.seed_course(tenant.id, "Algebra", 0).await;
        let user = Uuid::new_v4();
        store.seed_enrollment(tenant.id, user, course.id).await;

        Fixture {
            store,
            clock,
            processor,
            engine,
            tenant_id: tenant.id,
            course_id: course.id,
            user,
        }
    }

    async fn seed_playthrough(f: &Fixture, video_id: &str, ended: bool, rate: Option<f64>) {
        let base = f.clock.now() - Duration::hours(1);
        f.store
            .seed_event(
                f.tenant_id,
                f.user,
                f.course_id,
                video_id,
                PlaybackEventType::Play,
                base,
                0.0,
                rate,
            )
            .await;
        f.store
            .seed_event(
                f.tenant_id,
                f.user,
                f.course_id,
                video_id,
                PlaybackEventType::Heartbeat,
                base + Duration::minutes(5),
                300.0,
                rate,
            )
            .await;
        if ended {
            f.store
                .seed_event(
                    f.tenant_id,
                    f.user,
                    f.course_id,
                    video_id,
                    PlaybackEventType::Ended,
                    base + Duration::minutes(10),
                    600.0,
                    rate,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_completed_playthrough_closes_attendance() {
        let f = fixture().await;

        let check_in = f
            .engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();
        seed_playthrough(&f, "vid-1", true, None).await;

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.sessions_closed, 1);

        let session = f
            .store
            .find_session(f.tenant_id, check_in.session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_finished());
        assert_eq!(session.session_source(), SessionSource::Video);
        assert_eq!(session.close_reason.as_deref(), Some("video"));
        assert_eq!(session.confidence, Some(1.0));

        // The marker prevents a second close on the next run
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sessions_closed, 0);
    }

    #[tokio::test]
    async fn test_in_progress_group_leaves_attendance_open() {
        let f = fixture().await;

        let check_in = f
            .engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();
        seed_playthrough(&f, "vid-1", false, None).await;

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.completed, 0);
        assert_eq!(report.sessions_closed, 0);

        let session = f
            .store
            .find_session(f.tenant_id, check_in.session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_open());

        let watch = f
            .store
            .find_watch_session_in_progress(f.tenant_id, f.user, f.course_id, "vid-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(watch.watch_status(), WatchStatus::InProgress);
        assert!(watch.coverage_ratio > 0.0);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_aggregate() {
        let f = fixture().await;
        f.engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();

        seed_playthrough(&f, "vid-1", false, None).await;
        f.processor.run().await.unwrap();

        let first = f
            .store
            .find_watch_session_in_progress(f.tenant_id, f.user, f.course_id, "vid-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.watch_status(), WatchStatus::InProgress);

        // The learner finishes the video; the same aggregate flips to
        // completed instead of a duplicate being inserted.
        f.store
            .seed_event(
                f.tenant_id,
                f.user,
                f.course_id,
                "vid-1",
                PlaybackEventType::Ended,
                f.clock.now(),
                600.0,
                None,
            )
            .await;

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.sessions_closed, 1);

        let pending = f
            .store
            .list_completed_unclosed_watch_sessions(
                f.tenant_id,
                f.clock.now() - Duration::hours(24),
            )
            .await
            .unwrap();
        assert!(pending.is_empty());

        // Still the same aggregate row
        let open_again = f
            .store
            .find_watch_session_in_progress(f.tenant_id, f.user, f.course_id, "vid-1")
            .await
            .unwrap();
        assert!(open_again.is_none());
    }

    #[tokio::test]
    async fn test_fast_playthrough_does_not_complete() {
        let f = fixture().await;
        f.engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();
        seed_playthrough(&f, "vid-1", true, Some(2.0)).await;

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.completed, 0);
        assert_eq!(report.sessions_closed, 0);
    }

    #[tokio::test]
    async fn test_completion_without_attendance_is_retried_later() {
        let f = fixture().await;
        seed_playthrough(&f, "vid-1", true, None).await;

        // No open attendance session: the group completes but nothing
        // is closed, and the marker stays unset.
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.sessions_closed, 0);

        // Once the learner checks in, the next run reconciles it
        let check_in = f
            .engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sessions_closed, 1);

        let session = f
            .store
            .find_session(f.tenant_id, check_in.session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn test_groups_are_keyed_per_video() {
        let f = fixture().await;
        f.engine
            .check_in(f.tenant_id, f.user, f.course_id)
            .await
            .unwrap();

        seed_playthrough(&f, "vid-1", false, None).await;
        seed_playthrough(&f, "vid-2", false, None).await;

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.groups, 2);

        for video in ["vid-1", "vid-2"] {
            let watch = f
                .store
                .find_watch_session_in_progress(f.tenant_id, f.user, f.course_id, video)
                .await
                .unwrap();
            assert!(watch.is_some(), "missing aggregate for {video}");
        }
    }
}
