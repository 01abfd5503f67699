//! Day-schedule arithmetic for the challenge.
//!
//! Everything here is pure: callers pass the instants in, nothing reads the
//! wall clock or the local time zone.

use crate::models::ChallengeDay;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

const MS_PER_HOUR: i64 = 3_600_000;
/// A tracking window is always one calendar day, whatever the day length.
const TRACKING_WINDOW_HOURS: i64 = 24;
/// India Standard Time, UTC+5:30.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Builds `day_count` entries anchored at `start`; only day 0 starts active.
pub fn generate(start: DateTime<Utc>, day_duration_hours: u32, day_count: u32) -> Vec<ChallengeDay> {
    (0..day_count)
        .map(|day_number| day_entry(day_number, offset(start, day_duration_hours, day_number), day_number == 0))
        .collect()
}

/// Re-anchors every day from `from_day` onwards at `anchor`, leaving earlier days untouched.
pub fn regenerate_from(
    days: &[ChallengeDay],
    from_day: u32,
    anchor: DateTime<Utc>,
    day_duration_hours: u32,
) -> Vec<ChallengeDay> {
    days.iter()
        .map(|day| {
            if day.day_number < from_day {
                return day.clone();
            }
            let scheduled_date = offset(anchor, day_duration_hours, day.day_number - from_day);
            ChallengeDay {
                scheduled_date,
                tracking_date: tracking_date(scheduled_date),
                ..day.clone()
            }
        })
        .collect()
}

/// Whole days elapsed since `start`, clamped to `[0, max_day]`.
pub fn compute_current_day(
    start: DateTime<Utc>,
    day_duration_hours: u32,
    now: DateTime<Utc>,
    max_day: u32,
) -> u32 {
    if day_duration_hours == 0 {
        return 0;
    }
    let elapsed_ms = (now - start).num_milliseconds();
    if elapsed_ms < 0 {
        return 0;
    }
    let days_passed = elapsed_ms / (i64::from(day_duration_hours) * MS_PER_HOUR);
    u32::try_from(days_passed).map_or(max_day, |days| days.min(max_day))
}

/// The last day whose activation instant is at or before `at`.
///
/// Matches [`compute_current_day`] on an untouched schedule and keeps working
/// after a resume has re-anchored the tail of it.
pub fn day_at(days: &[ChallengeDay], at: DateTime<Utc>) -> u32 {
    days.iter()
        .filter(|day| day.scheduled_date <= at)
        .map(|day| day.day_number)
        .max()
        .unwrap_or(0)
}

pub fn tracking_date(scheduled_date: DateTime<Utc>) -> DateTime<Utc> {
    scheduled_date - Duration::hours(TRACKING_WINDOW_HOURS)
}

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Calendar date of `instant` in IST as `YYYY-MM-DD`.
pub fn ist_date_string(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&ist()).format("%Y-%m-%d").to_string()
}

/// The day whose scheduled activation falls on `date` (an IST calendar date).
pub fn day_scheduled_on(days: &[ChallengeDay], date: &str) -> Option<u32> {
    days.iter()
        .find(|day| ist_date_string(day.scheduled_date) == date)
        .map(|day| day.day_number)
}

/// Saturates at the end of the representable range instead of overflowing.
fn offset(anchor: DateTime<Utc>, day_duration_hours: u32, days: u32) -> DateTime<Utc> {
    Duration::try_hours(i64::from(day_duration_hours) * i64::from(days))
        .and_then(|span| anchor.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn day_entry(day_number: u32, scheduled_date: DateTime<Utc>, is_active: bool) -> ChallengeDay {
    ChallengeDay {
        day_number,
        scheduled_date,
        tracking_date: tracking_date(scheduled_date),
        is_active,
        is_completed: false,
        activated_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn generate_is_contiguous_with_tracking_one_day_back() {
        for (duration, count) in [(24, 15), (12, 8), (36, 3), (1, 1)] {
            let days = generate(start(), duration, count);
            assert_eq!(days.len(), count as usize);
            for (index, day) in days.iter().enumerate() {
                assert_eq!(day.day_number, index as u32);
                assert_eq!(day.tracking_date, day.scheduled_date - Duration::hours(24));
                assert_eq!(
                    day.scheduled_date,
                    start() + Duration::hours(i64::from(duration) * index as i64)
                );
                assert_eq!(day.is_active, index == 0);
                assert!(!day.is_completed);
            }
        }
    }

    #[test]
    fn current_day_clamps_both_ends() {
        assert_eq!(compute_current_day(start(), 24, start() - Duration::hours(1), 14), 0);
        assert_eq!(
            compute_current_day(start(), 24, start() + Duration::hours(1000 * 24), 14),
            14
        );
    }

    #[test]
    fn current_day_is_non_decreasing() {
        let mut previous = 0;
        for hour in -48..(24 * 20) {
            let day = compute_current_day(start(), 24, start() + Duration::hours(hour), 14);
            assert!(day >= previous);
            previous = day;
        }
        assert_eq!(previous, 14);
    }

    #[test]
    fn current_day_uses_configured_duration() {
        let now = start() + Duration::hours(30);
        assert_eq!(compute_current_day(start(), 12, now, 14), 2);
        assert_eq!(compute_current_day(start(), 24, now, 14), 1);
        assert_eq!(compute_current_day(start(), 0, now, 14), 0);
    }

    #[test]
    fn regenerate_keeps_history_and_reanchors_tail() {
        let days = generate(start(), 24, 15);
        let resume = start() + Duration::days(8) + Duration::hours(7);
        let regenerated = regenerate_from(&days, 3, resume, 24);

        for day in &regenerated[..3] {
            assert_eq!(*day, days[day.day_number as usize]);
        }
        assert_eq!(regenerated[3].scheduled_date, resume);
        assert_eq!(regenerated[4].scheduled_date, resume + Duration::hours(24));
        for day in &regenerated {
            assert_eq!(day.tracking_date, day.scheduled_date - Duration::hours(24));
        }
    }

    #[test]
    fn day_at_agrees_with_elapsed_time_calculation() {
        let days = generate(start(), 24, 15);
        for hour in [0, 5, 23, 24, 71, 72, 500] {
            let now = start() + Duration::hours(hour);
            assert_eq!(day_at(&days, now), compute_current_day(start(), 24, now, 14));
        }
    }

    #[test]
    fn generate_saturates_instead_of_overflowing() {
        let late = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let days = generate(late, 24, 3);
        assert_eq!(days[0].scheduled_date, late);
        assert_eq!(days[2].scheduled_date, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn ist_date_rolls_over_at_1830_utc() {
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 18, 29, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        assert_eq!(ist_date_string(before), "2026-03-01");
        assert_eq!(ist_date_string(after), "2026-03-02");
    }

    #[test]
    fn day_scheduled_on_matches_by_ist_calendar_date() {
        let days = generate(start(), 24, 15);
        assert_eq!(day_scheduled_on(&days, "2026-03-06"), Some(5));
        assert_eq!(day_scheduled_on(&days, "2025-01-01"), None);
    }
}
