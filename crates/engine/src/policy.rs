//! Notification policy resolver
//!
//! Resolves the single effective policy for a (tenant, user, course)
//! triple from the scope hierarchy and answers the two questions the
//! notification job asks: is this session stale, and is a (re-)send
//! due given its log history. Read-only; never mutates.

use chrono::{DateTime, Duration, Utc};
use rollcall_common::db::models::{AttendanceSession, NotificationLog, PolicyScope};
use rollcall_common::errors::Result;
use rollcall_common::store::AttendanceStore;
use std::sync::Arc;
use uuid::Uuid;

/// Built-in default applied when no policy record matches
const DEFAULT_FIRST_NOTIFY_AFTER_MIN: i32 = 60;
const DEFAULT_REPEAT_INTERVAL_HOURS: i32 = 24;
const DEFAULT_MAX_REPEAT_DAYS: i32 = 7;

/// Where the effective policy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    User,
    Course,
    Global,
    BuiltIn,
}

/// The resolved policy values for one (tenant, user, course) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub first_notify_after_min: i32,
    pub repeat_interval_hours: i32,
    pub max_repeat_days: i32,
    pub source: PolicySource,
}

/// Whether a stale session should be (re-)notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    /// No send yet, or the repeat interval has elapsed
    Due,
    /// Already notified within the repeat interval
    RecentlyNotified,
    /// First notification is older than the repeat ceiling; stop
    Suppressed,
}

impl EffectivePolicy {
    fn built_in() -> Self {
        Self {
            first_notify_after_min: DEFAULT_FIRST_NOTIFY_AFTER_MIN,
            repeat_interval_hours: DEFAULT_REPEAT_INTERVAL_HOURS,
            max_repeat_days: DEFAULT_MAX_REPEAT_DAYS,
            source: PolicySource::BuiltIn,
        }
    }

    /// A session is stale once its heartbeat has been silent for the
    /// policy's threshold. Sessions that never sent a heartbeat fall
    /// back to their start time.
    pub fn is_stale(&self, session: &AttendanceSession, now: DateTime<Utc>) -> bool {
        let last: DateTime<Utc> = session
            .last_heartbeat_at
            .unwrap_or(session.start_time)
            .into();
        now.signed_duration_since(last) >= Duration::minutes(i64::from(self.first_notify_after_min))
    }

    /// Classify whether a stale session is due for a (re-)send.
    /// `logs` must be ordered most recent first.
    pub fn notify_decision(&self, logs: &[NotificationLog], now: DateTime<Utc>) -> NotifyDecision {
        let (latest, oldest) = match (logs.first(), logs.last()) {
            (Some(latest), Some(oldest)) => (latest, oldest),
            _ => return NotifyDecision::Due,
        };

        let since_first = now.signed_duration_since(oldest.sent_at);
        if since_first >= Duration::days(i64::from(self.max_repeat_days)) {
            return NotifyDecision::Suppressed;
        }

        let since_latest = now.signed_duration_since(latest.sent_at);
        if since_latest < Duration::hours(i64::from(self.repeat_interval_hours)) {
            return NotifyDecision::RecentlyNotified;
        }

        NotifyDecision::Due
    }
}

/// Resolves effective policies from the store's policy records
pub struct PolicyResolver {
    store: Arc<dyn AttendanceStore>,
}

impl PolicyResolver {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    /// Strict priority: user scope, then course scope, then the single
    /// global record, then the built-in default. Inactive policies are
    /// absent at their scope and fall through.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<EffectivePolicy> {
        if let Some(policy) = self
            .store
            .find_active_policy(tenant_id, PolicyScope::User, None, Some(user_id))
            .await?
        {
            return Ok(EffectivePolicy {
                first_notify_after_min: policy.first_notify_after_min,
                repeat_interval_hours: policy.repeat_interval_hours,
                max_repeat_days: policy.max_repeat_days,
                source: PolicySource::User,
            });
        }

        if let Some(policy) = self
            .store
            .find_active_policy(tenant_id, PolicyScope::Course, Some(course_id), None)
            .await?
        {
            return Ok(EffectivePolicy {
                first_notify_after_min: policy.first_notify_after_min,
                repeat_interval_hours: policy.repeat_interval_hours,
                max_repeat_days: policy.max_repeat_days,
                source: PolicySource::Course,
            });
        }

        if let Some(policy) = self
            .store
            .find_active_policy(tenant_id, PolicyScope::Global, None, None)
            .await?
        {
            return Ok(EffectivePolicy {
                first_notify_after_min: policy.first_notify_after_min,
                repeat_interval_hours: policy.repeat_interval_hours,
                max_repeat_days: policy.max_repeat_days,
                source: PolicySource::Global,
            });
        }

        Ok(EffectivePolicy::built_in())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_common::db::models::{SessionSource, SessionStatus};
    use rollcall_common::store::MemoryStore;

    fn session_with_heartbeat(last_heartbeat: Option<DateTime<Utc>>) -> AttendanceSession {
        let start = Utc::now() - Duration::hours(3);
        AttendanceSession {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            status: String::from(SessionStatus::Open),
            source: String::from(SessionSource::Manual),
            start_time: start.into(),
            end_time: None,
            duration_sec: 0,
            confidence: None,
            last_heartbeat_at: last_heartbeat.map(Into::into),
            close_reason: None,
            created_at: start.into(),
            updated_at: start.into(),
        }
    }

    fn log_at(session: &AttendanceSession, sent_at: DateTime<Utc>) -> NotificationLog {
        NotificationLog {
            id: Uuid::new_v4(),
            tenant_id: session.tenant_id,
            session_id: session.id,
            user_id: session.user_id,
            template: "checkout_reminder".to_string(),
            sent_at: sent_at.into(),
        }
    }

    #[tokio::test]
    async fn test_resolver_priority_falls_through_scopes() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();
        let course = Uuid::new_v4();

        let user_policy = store
            .seed_policy(tenant.id, PolicyScope::User, None, Some(user), 10, 1, 1, true)
            .await;
        store
            .seed_policy(
                tenant.id,
                PolicyScope::Course,
                Some(course),
                None,
                20,
                2,
                2,
                true,
            )
            .await;
        store
            .seed_policy(tenant.id, PolicyScope::Global, None, None, 30, 3, 3, true)
            .await;

        let resolver = PolicyResolver::new(store.clone());

        let effective = resolver.resolve(tenant.id, user, course).await.unwrap();
        assert_eq!(effective.source, PolicySource::User);
        assert_eq!(effective.first_notify_after_min, 10);
        assert_eq!(user_policy.first_notify_after_min, 10);

        // A different user misses the user-scope policy
        let effective = resolver
            .resolve(tenant.id, Uuid::new_v4(), course)
            .await
            .unwrap();
        assert_eq!(effective.source, PolicySource::Course);
        assert_eq!(effective.first_notify_after_min, 20);

        // A different course falls through to global
        let effective = resolver
            .resolve(tenant.id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(effective.source, PolicySource::Global);
        assert_eq!(effective.first_notify_after_min, 30);
    }

    #[tokio::test]
    async fn test_resolver_built_in_default() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("acme").await;
        let resolver = PolicyResolver::new(store);

        let effective = resolver
            .resolve(tenant.id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(effective.source, PolicySource::BuiltIn);
        assert_eq!(effective.first_notify_after_min, 60);
        assert_eq!(effective.repeat_interval_hours, 24);
        assert_eq!(effective.max_repeat_days, 7);
    }

    #[tokio::test]
    async fn test_inactive_policy_falls_through() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("acme").await;
        let user = Uuid::new_v4();

        store
            .seed_policy(tenant.id, PolicyScope::User, None, Some(user), 10, 1, 1, false)
            .await;
        store
            .seed_policy(tenant.id, PolicyScope::Global, None, None, 30, 3, 3, true)
            .await;

        let resolver = PolicyResolver::new(store);
        let effective = resolver
            .resolve(tenant.id, user, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(effective.source, PolicySource::Global);
    }

    #[test]
    fn test_staleness_uses_heartbeat_with_start_fallback() {
        let policy = EffectivePolicy::built_in();
        let now = Utc::now();

        let fresh = session_with_heartbeat(Some(now - Duration::minutes(10)));
        assert!(!policy.is_stale(&fresh, now));

        let silent = session_with_heartbeat(Some(now - Duration::minutes(90)));
        assert!(policy.is_stale(&silent, now));

        // No heartbeat ever: start time (3h ago) decides
        let never = session_with_heartbeat(None);
        assert!(policy.is_stale(&never, now));
    }

    #[test]
    fn test_notify_decision_boundaries() {
        let policy = EffectivePolicy::built_in();
        let now = Utc::now();
        let session = session_with_heartbeat(None);

        // No log yet
        assert_eq!(policy.notify_decision(&[], now), NotifyDecision::Due);

        // Sent two hours ago, interval is 24h
        let recent = vec![log_at(&session, now - Duration::hours(2))];
        assert_eq!(
            policy.notify_decision(&recent, now),
            NotifyDecision::RecentlyNotified
        );

        // Latest send beyond the interval, first send within the ceiling
        let due = vec![
            log_at(&session, now - Duration::hours(30)),
            log_at(&session, now - Duration::days(3)),
        ];
        assert_eq!(policy.notify_decision(&due, now), NotifyDecision::Due);

        // First send past the 7-day ceiling
        let exhausted = vec![
            log_at(&session, now - Duration::hours(30)),
            log_at(&session, now - Duration::days(8)),
        ];
        assert_eq!(
            policy.notify_decision(&exhausted, now),
            NotifyDecision::Suppressed
        );
    }
}
