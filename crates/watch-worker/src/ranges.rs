//! Watched-range construction and merging
//!
//! Pure functions that fold an ordered playback event sequence into a
//! canonical set of watched ranges and derive coverage metrics from
//! them. The fold threads a small explicit state (the open range, if
//! any, and the last known rate) through the sequence; no state is
//! shared across groups.

use rollcall_common::db::models::{PlaybackEvent, PlaybackEventType, WatchedRange};

/// Two ranges whose gap is at most this many seconds merge into one
pub const MERGE_GAP_SEC: f64 = 1.0;

/// Playback rates inside this band count as normal speed
pub const NORMAL_RATE_MIN: f64 = 0.9;
pub const NORMAL_RATE_MAX: f64 = 1.1;

/// Derived coverage numbers for one merged range set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoverageMetrics {
    pub total_watched_sec: f64,
    /// Fraction of the estimated video length covered, capped at 1
    pub coverage_ratio: f64,
    /// Fraction of watched time spent at normal speed
    pub normal_speed_ratio: f64,
}

fn is_normal_rate(rate: f64) -> bool {
    (NORMAL_RATE_MIN..=NORMAL_RATE_MAX).contains(&rate)
}

/// Fold a time-ordered event sequence into raw (unmerged) ranges
pub fn build_ranges(events: &[PlaybackEvent]) -> Vec<WatchedRange> {
    let mut ranges = Vec::new();
    let mut open: Option<WatchedRange> = None;
    let mut last_rate = 1.0;

    for event in events {
        let pos = event.position_sec;
        match event.kind() {
            PlaybackEventType::Play => {
                if open.is_none() {
                    open = Some(WatchedRange {
                        start: pos,
                        end: pos,
                        rate: event.effective_rate(),
                    });
                }
            }
            PlaybackEventType::Pause | PlaybackEventType::Ended => {
                if let Some(mut range) = open.take() {
                    range.end = pos;
                    ranges.push(range);
                }
            }
            PlaybackEventType::Heartbeat => {
                if let Some(range) = open.as_mut() {
                    range.end = pos;
                }
            }
            PlaybackEventType::RateChange => {
                let new_rate = event.effective_rate();
                if let Some(mut range) = open.take() {
                    range.end = pos;
                    ranges.push(range);
                    open = Some(WatchedRange {
                        start: pos,
                        end: pos,
                        rate: new_rate,
                    });
                }
                last_rate = new_rate;
            }
            PlaybackEventType::Seek => {
                // Push the open range as-is; the seek target starts a
                // new range at the last known rate.
                if let Some(range) = open.take() {
                    ranges.push(range);
                    open = Some(WatchedRange {
                        start: pos,
                        end: pos,
                        rate: last_rate,
                    });
                }
            }
        }
    }

    // A range left open by a missing PAUSE/ENDED still counts
    if let Some(range) = open {
        ranges.push(range);
    }

    ranges
}

/// Sort by start and merge ranges whose gap is within the tolerance.
/// Negative-length ranges are discarded. When two ranges merge, the
/// rate furthest from 1.0 wins so non-normal-speed evidence survives.
pub fn merge_ranges(mut ranges: Vec<WatchedRange>) -> Vec<WatchedRange> {
    ranges.retain(|r| r.end >= r.start);
    ranges.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged: Vec<WatchedRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start - last.end <= MERGE_GAP_SEC => {
                last.end = last.end.max(range.end);
                if (range.rate - 1.0).abs() > (last.rate - 1.0).abs() {
                    last.rate = range.rate;
                }
            }
            _ => merged.push(range),
        }
    }

    merged
}

/// Compute coverage metrics over a merged range set. The estimated
/// video length is the maximum range end observed; no authoritative
/// length is available.
pub fn coverage(ranges: &[WatchedRange]) -> CoverageMetrics {
    if ranges.is_empty() {
        return CoverageMetrics::default();
    }

    let total: f64 = ranges.iter().map(WatchedRange::length).sum();
    let normal: f64 = ranges
        .iter()
        .filter(|r| is_normal_rate(r.rate))
        .map(WatchedRange::length)
        .sum();
    let estimated = ranges.iter().map(|r| r.end).fold(0.0, f64::max);

    CoverageMetrics {
        total_watched_sec: total,
        coverage_ratio: if estimated > 0.0 {
            (total / estimated).min(1.0)
        } else {
            0.0
        },
        normal_speed_ratio: if total > 0.0 { normal / total } else { 0.0 },
    }
}

/// A group completes when an ENDED event arrives at normal speed
pub fn is_completed(events: &[PlaybackEvent]) -> bool {
    events
        .iter()
        .any(|e| e.kind() == PlaybackEventType::Ended && is_normal_rate(e.effective_rate()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn events(specs: &[(PlaybackEventType, f64, Option<f64>)]) -> Vec<PlaybackEvent> {
        let base = Utc::now();
        let user = Uuid::new_v4();
        let course = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        specs
            .iter()
            .enumerate()
            .map(|(i, (kind, pos, rate))| PlaybackEvent {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                user_id: user,
                course_id: course,
                video_id: "vid-1".to_string(),
                event_type: String::from(*kind),
                event_time: (base + Duration::seconds(i as i64)).into(),
                position_sec: *pos,
                playback_rate: *rate,
                created_at: base.into(),
            })
            .collect()
    }

    fn range(start: f64, end: f64, rate: f64) -> WatchedRange {
        WatchedRange { start, end, rate }
    }

    #[test]
    fn test_play_pause_produces_single_range() {
        let ranges = build_ranges(&events(&[
            (PlaybackEventType::Play, 0.0, None),
            (PlaybackEventType::Heartbeat, 30.0, None),
            (PlaybackEventType::Pause, 60.0, None),
        ]));
        assert_eq!(ranges, vec![range(0.0, 60.0, 1.0)]);
    }

    #[test]
    fn test_play_while_open_is_ignored() {
        let ranges = build_ranges(&events(&[
            (PlaybackEventType::Play, 0.0, Some(1.0)),
            (PlaybackEventType::Play, 20.0, Some(2.0)),
            (PlaybackEventType::Pause, 40.0, None),
        ]));
        assert_eq!(ranges, vec![range(0.0, 40.0, 1.0)]);
    }

    #[test]
    fn test_trailing_open_range_is_flushed() {
        let ranges = build_ranges(&events(&[
            (PlaybackEventType::Play, 0.0, None),
            (PlaybackEventType::Heartbeat, 45.0, None),
        ]));
        assert_eq!(ranges, vec![range(0.0, 45.0, 1.0)]);
    }

    #[test]
    fn test_rate_change_splits_range_and_updates_last_rate() {
        let ranges = build_ranges(&events(&[
            (PlaybackEventType::Play, 0.0, None),
            (PlaybackEventType::RateChange, 30.0, Some(2.0)),
            (PlaybackEventType::Pause, 60.0, None),
            // Seek while closed is a no-op, but a later seek after a
            // new play inherits the changed rate
            (PlaybackEventType::Play, 100.0, Some(2.0)),
            (PlaybackEventType::Seek, 200.0, None),
            (PlaybackEventType::Pause, 230.0, None),
        ]));
        assert_eq!(
            ranges,
            vec![
                range(0.0, 30.0, 1.0),
                range(30.0, 60.0, 2.0),
                range(100.0, 100.0, 2.0),
                range(200.0, 230.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_seek_pushes_open_range_as_is() {
        let ranges = build_ranges(&events(&[
            (PlaybackEventType::Play, 0.0, None),
            (PlaybackEventType::Heartbeat, 50.0, None),
            (PlaybackEventType::Seek, 300.0, None),
            (PlaybackEventType::Pause, 360.0, None),
        ]));
        // The first range keeps its heartbeat end, not the seek target
        assert_eq!(
            ranges,
            vec![range(0.0, 50.0, 1.0), range(300.0, 360.0, 1.0)]
        );
    }

    #[test]
    fn test_merge_within_gap_tolerance() {
        let merged = merge_ranges(vec![range(0.0, 10.0, 1.0), range(10.5, 20.0, 1.0)]);
        assert_eq!(merged, vec![range(0.0, 20.0, 1.0)]);

        let separate = merge_ranges(vec![range(0.0, 10.0, 1.0), range(15.0, 20.0, 1.0)]);
        assert_eq!(
            separate,
            vec![range(0.0, 10.0, 1.0), range(15.0, 20.0, 1.0)]
        );
    }

    #[test]
    fn test_merge_keeps_rate_furthest_from_normal() {
        let merged = merge_ranges(vec![range(0.0, 10.0, 1.0), range(10.5, 20.0, 2.0)]);
        assert_eq!(merged, vec![range(0.0, 20.0, 2.0)]);

        let merged = merge_ranges(vec![range(0.0, 10.0, 0.5), range(10.5, 20.0, 1.0)]);
        assert_eq!(merged, vec![range(0.0, 20.0, 0.5)]);
    }

    #[test]
    fn test_merge_discards_negative_ranges_and_sorts() {
        let merged = merge_ranges(vec![
            range(50.0, 60.0, 1.0),
            range(30.0, 10.0, 1.0),
            range(0.0, 10.0, 1.0),
        ]);
        assert_eq!(
            merged,
            vec![range(0.0, 10.0, 1.0), range(50.0, 60.0, 1.0)]
        );
    }

    #[test]
    fn test_coverage_metrics() {
        let metrics = coverage(&[range(0.0, 60.0, 1.0), range(80.0, 100.0, 2.0)]);
        assert_eq!(metrics.total_watched_sec, 80.0);
        assert!((metrics.coverage_ratio - 0.8).abs() < 1e-9);
        assert!((metrics.normal_speed_ratio - 0.75).abs() < 1e-9);

        // Empty set never divides by zero
        assert_eq!(coverage(&[]), CoverageMetrics::default());

        // Full coverage is capped at 1
        let metrics = coverage(&[range(0.0, 100.0, 1.0), range(0.0, 50.0, 1.0)]);
        assert_eq!(metrics.coverage_ratio, 1.0);
    }

    #[test]
    fn test_completion_requires_normal_speed_ended() {
        let fast = events(&[(PlaybackEventType::Ended, 600.0, Some(2.0))]);
        assert!(!is_completed(&fast));

        let normal = events(&[(PlaybackEventType::Ended, 600.0, Some(1.0))]);
        assert!(is_completed(&normal));

        // Unset rate defaults to 1.0
        let unset = events(&[(PlaybackEventType::Ended, 600.0, None)]);
        assert!(is_completed(&unset));

        let paused = events(&[(PlaybackEventType::Pause, 600.0, Some(1.0))]);
        assert!(!is_completed(&paused));
    }
}
