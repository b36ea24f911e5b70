//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions
//! for the attendance engine and the two periodic jobs.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Rollcall metrics
pub const METRICS_PREFIX: &str = "rollcall";

/// Histogram buckets for batch job wall-clock duration (in seconds)
pub const JOB_DURATION_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    300.0,  // 5m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Session lifecycle metrics
    describe_counter!(
        format!("{}_check_ins_total", METRICS_PREFIX),
        Unit::Count,
        "Total check-in attempts, labelled by outcome"
    );

    describe_counter!(
        format!("{}_sessions_closed_total", METRICS_PREFIX),
        Unit::Count,
        "Total sessions closed, labelled by reason"
    );

    // Notification job metrics
    describe_counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        Unit::Count,
        "Notification attempts, labelled by outcome (sent/skipped/failed)"
    );

    describe_counter!(
        format!("{}_sessions_auto_closed_total", METRICS_PREFIX),
        Unit::Count,
        "Sessions force-closed by the staleness ceiling sweep"
    );

    // Aggregation job metrics
    describe_counter!(
        format!("{}_watch_groups_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Playback event groups folded into watch sessions"
    );

    describe_counter!(
        format!("{}_watch_sessions_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Watch sessions that reached completed status"
    );

    describe_counter!(
        format!("{}_video_closures_total", METRICS_PREFIX),
        Unit::Count,
        "Attendance sessions closed from video completion"
    );

    // Shared job metrics
    describe_histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Batch job run duration in seconds"
    );

    describe_counter!(
        format!("{}_job_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Unit-of-work errors accumulated by batch jobs"
    );

    tracing::info!("Metrics registered");
}

/// Record a check-in attempt
pub fn record_check_in(outcome: &str) {
    counter!(
        format!("{}_check_ins_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a session close with its reason
/// (check_out, self_checkout, admin_close, auto_close, video)
pub fn record_session_closed(reason: &str) {
    counter!(
        format!("{}_sessions_closed_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record the outcome totals of one notification job run
pub fn record_notification_run(
    duration_secs: f64,
    sent: u64,
    skipped: u64,
    failed: u64,
    auto_closed: u64,
) {
    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "outcome" => "sent"
    )
    .increment(sent);

    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "outcome" => "skipped"
    )
    .increment(skipped);

    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "outcome" => "failed"
    )
    .increment(failed);

    counter!(format!("{}_sessions_auto_closed_total", METRICS_PREFIX)).increment(auto_closed);

    histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        "job" => "notify"
    )
    .record(duration_secs);
}

/// Record the outcome totals of one aggregation job run
pub fn record_aggregation_run(
    duration_secs: f64,
    groups: u64,
    completed: u64,
    closed: u64,
    errors: u64,
) {
    counter!(format!("{}_watch_groups_processed_total", METRICS_PREFIX)).increment(groups);
    counter!(format!("{}_watch_sessions_completed_total", METRICS_PREFIX)).increment(completed);
    counter!(format!("{}_video_closures_total", METRICS_PREFIX)).increment(closed);

    counter!(
        format!("{}_job_errors_total", METRICS_PREFIX),
        "job" => "aggregate"
    )
    .increment(errors);

    histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        "job" => "aggregate"
    )
    .record(duration_secs);
}
