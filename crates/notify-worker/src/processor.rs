//! Notification worker processor
//!
//! For each active tenant: scan open sessions, notify the stale ones
//! through the mail transport, then force-close sessions older than
//! the staleness ceiling. At-least-once safe: duplicate sends are
//! prevented by the notification-log presence check and duplicate
//! auto-closes by the open-state guard.

use chrono::{DateTime, Duration, Utc};
use rollcall_common::clock::Clock;
use rollcall_common::db::models::{AttendanceSession, Tenant};
use rollcall_common::errors::Result;
use rollcall_common::mail::Mailer;
use rollcall_common::metrics::record_notification_run;
use rollcall_common::store::AttendanceStore;
use rollcall_engine::{notification_log, AttendanceEngine, NotifyDecision, PolicyResolver};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Notification worker configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Hours a session may stay open before the sweep force-closes it
    pub stale_session_ceiling_hours: i64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            stale_session_ceiling_hours: 48,
        }
    }
}

/// Per-tenant breakdown of one run
#[derive(Debug, Clone, Serialize)]
pub struct TenantRunReport {
    pub tenant_id: Uuid,
    /// Stale sessions examined (non-stale sessions are not counted)
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub auto_closed: u64,
    pub errors: Vec<String>,
}

impl TenantRunReport {
    fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            processed: 0,
            sent: 0,
            skipped: 0,
            failed: 0,
            auto_closed: 0,
            errors: Vec::new(),
        }
    }
}

/// Aggregate report of one run across all tenants
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationRunReport {
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub auto_closed: u64,
    pub tenants: Vec<TenantRunReport>,
}

enum SessionOutcome {
    NotStale,
    Sent,
    Skipped,
    Failed(String),
}

/// Notification worker processor
pub struct NotificationProcessor {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    engine: AttendanceEngine,
    resolver: PolicyResolver,
    config: NotifyConfig,
}

impl NotificationProcessor {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn Mailer>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            engine: AttendanceEngine::new(store.clone(), clock.clone()),
            resolver: PolicyResolver::new(store.clone()),
            store,
            clock,
            mailer,
            config,
        }
    }

    /// One full run across all active tenants. Per-tenant failures are
    /// recorded in the report without aborting the other tenants.
    pub async fn run(&self) -> Result<NotificationRunReport> {
        let started = Instant::now();
        let tenants = self.store.list_active_tenants().await?;

        let mut report = NotificationRunReport::default();
        for tenant in &tenants {
            let tenant_report = self.process_tenant(tenant).await;

            report.processed += tenant_report.processed;
            report.sent += tenant_report.sent;
            report.skipped += tenant_report.skipped;
            report.failed += tenant_report.failed;
            report.auto_closed += tenant_report.auto_closed;
            report.tenants.push(tenant_report);
        }

        let duration = started.elapsed().as_secs_f64();
        record_notification_run(
            duration,
            report.sent,
            report.skipped,
            report.failed,
            report.auto_closed,
        );
        info!(
            tenants = tenants.len(),
            processed = report.processed,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            auto_closed = report.auto_closed,
            duration_secs = duration,
            "Notification run complete"
        );

        Ok(report)
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn process_tenant(&self, tenant: &Tenant) -> TenantRunReport {
        let mut report = TenantRunReport::new(tenant.id);
        let now = self.clock.now();

        let sessions = match self.store.list_open_sessions(tenant.id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "Failed to list open sessions");
                report.errors.push(format!("list open sessions: {e}"));
                return report;
            }
        };

        for session in &sessions {
            match self.process_session(tenant, session, now).await {
                Ok(SessionOutcome::NotStale) => {}
                Ok(SessionOutcome::Sent) => {
                    report.processed += 1;
                    report.sent += 1;
                }
                Ok(SessionOutcome::Skipped) => {
                    report.processed += 1;
                    report.skipped += 1;
                }
                Ok(SessionOutcome::Failed(message)) => {
                    report.processed += 1;
                    report.failed += 1;
                    report.errors.push(message);
                }
                Err(e) => {
                    report.processed += 1;
                    report.failed += 1;
                    report.errors.push(format!("session {}: {e}", session.id));
                }
            }
        }

        // Staleness-independent sweep: close anything open past the
        // ceiling, regardless of notification state.
        let ceiling = Duration::hours(self.config.stale_session_ceiling_hours);
        for session in &sessions {
            if now.signed_duration_since(session.start_time) <= ceiling {
                continue;
            }
            match self.engine.force_close(tenant.id, session.id).await {
                Ok(_) => report.auto_closed += 1,
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "Auto-close failed");
                    report.errors.push(format!("auto-close {}: {e}", session.id));
                }
            }
        }

        report
    }

    /// Notify one open session if it is stale and a send is due
    async fn process_session(
        &self,
        tenant: &Tenant,
        session: &AttendanceSession,
        now: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        let policy = self
            .resolver
            .resolve(tenant.id, session.user_id, session.course_id)
            .await?;

        if !policy.is_stale(session, now) {
            return Ok(SessionOutcome::NotStale);
        }

        let logs = self
            .store
            .list_notification_logs(tenant.id, session.id)
            .await?;
        match policy.notify_decision(&logs, now) {
            NotifyDecision::RecentlyNotified | NotifyDecision::Suppressed => {
                return Ok(SessionOutcome::Skipped);
            }
            NotifyDecision::Due => {}
        }

        let context = serde_json::json!({
            "session_id": session.id,
            "course_id": session.course_id,
            "start_time": session.start_time,
        });

        if let Err(e) = self
            .mailer
            .send(tenant.id, session.user_id, "checkout_reminder", &context)
            .await
        {
            warn!(session_id = %session.id, error = %e, "Notification send failed");
            return Ok(SessionOutcome::Failed(format!(
                "send for session {}: {e}",
                session.id
            )));
        }

        // Log only after a successful send; a failed send stays
        // un-logged so the next run retries it.
        self.store
            .insert_notification_log(notification_log(session, now))
            .await?;

        info!(session_id = %session.id, user_id = %session.user_id, "Notification sent");
        Ok(SessionOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_common::clock::ManualClock;
    use rollcall_common::db::models::PolicyScope;
    use rollcall_common::mail::RecordingMailer;
    use rollcall_common::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        mailer: Arc<RecordingMailer>,
        processor: NotificationProcessor,
        engine: AttendanceEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ));
        let mailer = Arc::new(RecordingMailer::new());
        let processor = NotificationProcessor::new(
            store.clone(),
            clock.clone(),
            mailer.clone(),
            NotifyConfig::default(),
        );
        let engine = AttendanceEngine::new(store.clone(), clock.clone());

        Fixture {
            store,
            clock,
            mailer,
            processor,
            engine,
        }
    }

    async fn open_session(f: &Fixture) -> (Uuid, AttendanceSession) {
        let tenant = f.store.seed_tenant("acme").await;
        let course = f.store.seed_course(tenant.id, "Algebra", 30).await;
        let user = Uuid::new_v4();
        f.store.seed_enrollment(tenant.id, user, course.id).await;

        let check_in = f.engine.check_in(tenant.id, user, course.id).await.unwrap();
        (tenant.id, check_in.session)
    }

    #[tokio::test]
    async fn test_stale_session_is_notified_once() {
        let f = fixture();
        let (tenant_id, session) = open_session(&f).await;

        // Default policy: first notify after 60 minutes of silence
        f.clock.advance(Duration::minutes(90));

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(f.mailer.sent_count(), 1);

        let logs = f
            .store
            .list_notification_logs(tenant_id, session.id)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);

        // Re-run within the repeat interval: skipped, no second mail
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(f.mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_fresh_session_is_not_processed() {
        let f = fixture();
        open_session(&f).await;

        f.clock.advance(Duration::minutes(10));

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(f.mailer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_no_log_for_retry() {
        let f = fixture();
        let (tenant_id, session) = open_session(&f).await;
        f.mailer.fail_for(session.user_id);

        f.clock.advance(Duration::minutes(90));

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(report.tenants.len(), 1);
        assert_eq!(report.tenants[0].errors.len(), 1);

        // No log was written, so the next run will attempt the send again
        let logs = f
            .store
            .list_notification_logs(tenant_id, session.id)
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_send_after_interval_then_suppression() {
        let f = fixture();
        let (tenant_id, session) = open_session(&f).await;

        // Tight policy: repeat daily, stop after two days
        f.store
            .seed_policy(
                tenant_id,
                PolicyScope::Global,
                None,
                None,
                60,
                24,
                2,
                true,
            )
            .await;

        f.clock.advance(Duration::minutes(90));
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sent, 1);

        // Next day: repeat interval elapsed, second send
        f.clock.advance(Duration::hours(25));
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(f.mailer.sent_count(), 2);

        // Past the repeat ceiling: permanently suppressed
        f.clock.advance(Duration::hours(25));
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(f.mailer.sent_count(), 2);

        // Session was opened 50+ hours ago, so the sweep also closed it
        assert!(report.auto_closed >= 1);
        let session = f
            .store
            .find_session(tenant_id, session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn test_auto_close_sweep_is_idempotent() {
        let f = fixture();
        let (tenant_id, session) = open_session(&f).await;

        f.clock.advance(Duration::hours(50));

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.auto_closed, 1);

        let closed = f
            .store
            .find_session(tenant_id, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.close_reason.as_deref(), Some("auto_close"));

        // Closed sessions are no longer listed as open, so a second
        // run sweeps nothing.
        let report = f.processor.run().await.unwrap();
        assert_eq!(report.auto_closed, 0);
        assert!(report.tenants[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_run_covers_all_tenants() {
        let f = fixture();
        let (_, _) = open_session(&f).await;
        let (_, _) = open_session(&f).await;

        f.clock.advance(Duration::minutes(90));

        let report = f.processor.run().await.unwrap();
        assert_eq!(report.tenants.len(), 2);
        assert_eq!(report.sent, 2);
        assert_eq!(f.mailer.sent_count(), 2);
    }
}
