//! Election timing. Status is always derived from the clock, never stored.
//!
//! Voting is open on the half-open window `[start, end)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStatus {
    Upcoming,
    Active,
    Ended,
}

impl ElectionStatus {
    pub fn accepts_votes(&self) -> bool {
        matches!(self, ElectionStatus::Active)
    }
}

pub fn status_at(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> ElectionStatus {
    if now < start {
        ElectionStatus::Upcoming
    } else if now < end {
        ElectionStatus::Active
    } else {
        ElectionStatus::Ended
    }
}

/// Percentage of the voting window elapsed, in `[0, 100]`.
pub fn progress_at(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    if now < start {
        return 0.0;
    }
    if now >= end {
        return 100.0;
    }
    let total = (end - start).num_milliseconds() as f64;
    let elapsed = (now - start).num_milliseconds() as f64;
    (elapsed / total * 100.0).clamp(0.0, 100.0)
}

/// Time left until `target`, floored at zero.
pub fn remaining(now: DateTime<Utc>, target: DateTime<Utc>) -> Duration {
    let diff = target - now;
    if diff > Duration::zero() { diff } else { Duration::zero() }
}

/// Formats a duration as `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Snapshot of an election's timing for display, recomputed on every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Countdown {
    pub status: ElectionStatus,
    /// Start time while upcoming, end time while active, none once ended.
    pub target: Option<DateTime<Utc>>,
    pub remaining: Duration,
    pub progress: f64,
}

impl Countdown {
    pub fn at(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let status = status_at(now, start, end);
        let target = match status {
            ElectionStatus::Upcoming => Some(start),
            ElectionStatus::Active => Some(end),
            ElectionStatus::Ended => None,
        };
        Self {
            status,
            target,
            remaining: target.map(|t| remaining(now, t)).unwrap_or_else(Duration::zero),
            progress: progress_at(now, start, end),
        }
    }

    pub fn label(&self) -> &'static str {
        match self.status {
            ElectionStatus::Upcoming => "Election starts in",
            ElectionStatus::Active => "Election ends in",
            ElectionStatus::Ended => "Election has ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    #[test]
    fn boundaries_are_half_open() {
        let (start, end) = (t0(), t0() + Duration::hours(1));
        assert_eq!(status_at(start - Duration::seconds(1), start, end), ElectionStatus::Upcoming);
        assert_eq!(status_at(start, start, end), ElectionStatus::Active);
        assert_eq!(status_at(end - Duration::milliseconds(1), start, end), ElectionStatus::Active);
        assert_eq!(status_at(end, start, end), ElectionStatus::Ended);
    }

    #[test]
    fn degenerate_window_is_never_active() {
        assert_eq!(status_at(t0() - Duration::seconds(1), t0(), t0()), ElectionStatus::Upcoming);
        assert_eq!(status_at(t0(), t0(), t0()), ElectionStatus::Ended);
        assert_eq!(status_at(t0() + Duration::days(3), t0(), t0()), ElectionStatus::Ended);
        assert_eq!(progress_at(t0(), t0(), t0()), 100.0);
    }

    #[test]
    fn progress_halfway() {
        let now = t0() + Duration::seconds(1800);
        assert_eq!(progress_at(now, t0(), t0() + Duration::seconds(3600)), 50.0);
    }

    #[test]
    fn progress_outside_window() {
        let end = t0() + Duration::hours(2);
        assert_eq!(progress_at(t0() - Duration::hours(1), t0(), end), 0.0);
        assert_eq!(progress_at(end, t0(), end), 100.0);
        assert_eq!(progress_at(end + Duration::hours(1), t0(), end), 100.0);
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(remaining(t0() + Duration::minutes(5), t0()), Duration::zero());
        assert_eq!(remaining(t0(), t0() + Duration::minutes(5)), Duration::minutes(5));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::seconds(0)), "00:00:00");
        assert_eq!(format_hms(Duration::seconds(3725)), "01:02:05");
        assert_eq!(format_hms(Duration::hours(49)), "49:00:00");
    }

    #[test]
    fn countdown_targets_next_boundary() {
        let end = t0() + Duration::hours(1);
        let before = Countdown::at(t0() - Duration::minutes(10), t0(), end);
        assert_eq!(before.target, Some(t0()));
        assert_eq!(before.remaining, Duration::minutes(10));
        assert_eq!(before.label(), "Election starts in");

        let during = Countdown::at(t0() + Duration::minutes(15), t0(), end);
        assert_eq!(during.target, Some(end));
        assert_eq!(during.remaining, Duration::minutes(45));
        assert_eq!(during.progress, 25.0);

        let after = Countdown::at(end, t0(), end);
        assert_eq!(after.target, None);
        assert_eq!(after.remaining, Duration::zero());
    }
}
