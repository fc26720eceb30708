//! Rolling & calendar window math (component L1).
//!
//! All "natural" windows (daily/weekly/monthly) are computed against a
//! single fixed UTC offset configured for the process, not host-local
//! time — see DESIGN.md Open Question 5 for why this isn't a real tz
//! database lookup.

use time::{Duration, OffsetDateTime, UtcOffset, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    FiveHour,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyResetMode {
    Fixed,
    Rolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// `None` for rolling windows, which have no fixed reset instant.
    pub reset_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInfo {
    pub reset_at: Option<OffsetDateTime>,
    pub ttl_seconds: u64,
}

/// Parse `HH:MM`; any malformed value normalizes to `00:00` rather than
/// erroring, per spec.md §4.1.
pub fn parse_reset_time(value: &str) -> (u8, u8) {
    let mut parts = value.splitn(2, ':');
    let hour = parts.next().and_then(|s| s.trim().parse::<u8>().ok());
    let minute = parts.next().and_then(|s| s.trim().parse::<u8>().ok());
    match (hour, minute) {
        (Some(h), Some(m)) if h < 24 && m < 60 => (h, m),
        _ => (0, 0),
    }
}

fn at_time(date_time: OffsetDateTime, hour: u8, minute: u8) -> OffsetDateTime {
    date_time
        .replace_time(
            time::Time::from_hms(hour, minute, 0).unwrap_or(time::Time::MIDNIGHT),
        )
}

/// Start-of-day boundary for `daily` in `fixed` mode: today's `HH:MM`
/// if `now` is at or past it, else yesterday's.
fn fixed_daily_start(now: OffsetDateTime, hour: u8, minute: u8) -> OffsetDateTime {
    let today_boundary = at_time(now, hour, minute);
    if now >= today_boundary {
        today_boundary
    } else {
        at_time(now - Duration::days(1), hour, minute)
    }
}

fn month_start(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_day(1)
        .unwrap_or(now)
        .replace_time(time::Time::MIDNIGHT)
}

fn next_month_start(now: OffsetDateTime) -> OffsetDateTime {
    let start = month_start(now);
    let (year, month) = (start.year(), start.month());
    let (next_year, next_month) = if month == time::Month::December {
        (year + 1, time::Month::January)
    } else {
        (year, month.next())
    };
    start
        .replace_year(next_year)
        .and_then(|d| d.replace_month(next_month))
        .unwrap_or(start + Duration::days(31))
}

fn week_start(now: OffsetDateTime) -> OffsetDateTime {
    // ISO week: Monday 00:00.
    let days_since_monday = now.weekday().number_days_from_monday();
    at_time(now - Duration::days(days_since_monday as i64), 0, 0)
}

/// Compute the window for `period` as of `now` (already converted to
/// the configured offset by the caller via [`now_in_offset`]).
pub fn get_time_range(
    period: Period,
    now: OffsetDateTime,
    reset_time: Option<&str>,
    mode: Option<DailyResetMode>,
) -> TimeRange {
    match period {
        Period::FiveHour => TimeRange {
            start: now - Duration::hours(5),
            end: now,
            reset_at: None,
        },
        Period::Daily => {
            let (hour, minute) = reset_time.map(parse_reset_time).unwrap_or((0, 0));
            match mode.unwrap_or(DailyResetMode::Fixed) {
                DailyResetMode::Rolling => TimeRange {
                    start: now - Duration::hours(24),
                    end: now,
                    reset_at: None,
                },
                DailyResetMode::Fixed => {
                    let start = fixed_daily_start(now, hour, minute);
                    let reset_at = start + Duration::days(1);
                    TimeRange {
                        start,
                        end: now,
                        reset_at: Some(reset_at),
                    }
                }
            }
        }
        Period::Weekly => {
            let start = week_start(now);
            TimeRange {
                start,
                end: now,
                reset_at: Some(start + Duration::weeks(1)),
            }
        }
        Period::Monthly => {
            let start = month_start(now);
            TimeRange {
                start,
                end: now,
                reset_at: Some(next_month_start(now)),
            }
        }
    }
}

/// TTL in seconds for the Redis key backing `period`'s counter, i.e.
/// how long until the window naturally resets. Rolling windows have no
/// reset instant, so this returns the window's own duration (the
/// caller re-derives the rolling sum on every read regardless; the TTL
/// just bounds how long a stale key may linger).
pub fn get_ttl(period: Period, now: OffsetDateTime, reset_time: Option<&str>, mode: Option<DailyResetMode>) -> u64 {
    let range = get_time_range(period, now, reset_time, mode);
    match range.reset_at {
        Some(reset_at) => (reset_at - now).whole_seconds().max(0) as u64,
        None => match period {
            Period::FiveHour => 5 * 3600,
            Period::Daily => 24 * 3600,
            _ => 0,
        },
    }
}

pub fn get_reset_info(
    period: Period,
    now: OffsetDateTime,
    reset_time: Option<&str>,
    mode: Option<DailyResetMode>,
) -> ResetInfo {
    let range = get_time_range(period, now, reset_time, mode);
    let ttl_seconds = match range.reset_at {
        Some(reset_at) => (reset_at - now).whole_seconds().max(0) as u64,
        None => get_ttl(period, now, reset_time, mode),
    };
    ResetInfo {
        reset_at: range.reset_at,
        ttl_seconds,
    }
}

pub fn get_seconds_until_midnight(now: OffsetDateTime) -> u64 {
    let next_midnight = at_time(now + Duration::days(1), 0, 0);
    (next_midnight - now).whole_seconds().max(0) as u64
}

/// Convert a UTC instant into the process's configured offset.
pub fn now_in_offset(now_utc: OffsetDateTime, tz_offset_hours: i8) -> OffsetDateTime {
    let offset = UtcOffset::from_hms(tz_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC);
    now_utc.to_offset(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parse_reset_time_normalizes_invalid() {
        assert_eq!(parse_reset_time("25:99"), (0, 0));
        assert_eq!(parse_reset_time("not-a-time"), (0, 0));
        assert_eq!(parse_reset_time("09:30"), (9, 30));
    }

    #[test]
    fn daily_fixed_before_boundary_uses_yesterday() {
        let now = datetime!(2026-07-28 03:00:00 +8);
        let range = get_time_range(Period::Daily, now, Some("09:00"), Some(DailyResetMode::Fixed));
        assert_eq!(range.start, datetime!(2026-07-27 09:00:00 +8));
        assert_eq!(range.reset_at, Some(datetime!(2026-07-28 09:00:00 +8)));
    }

    #[test]
    fn daily_fixed_after_boundary_uses_today() {
        let now = datetime!(2026-07-28 10:00:00 +8);
        let range = get_time_range(Period::Daily, now, Some("09:00"), Some(DailyResetMode::Fixed));
        assert_eq!(range.start, datetime!(2026-07-28 09:00:00 +8));
        assert_eq!(range.reset_at, Some(datetime!(2026-07-29 09:00:00 +8)));
    }

    #[test]
    fn daily_rolling_has_no_reset_at() {
        let now = datetime!(2026-07-28 10:00:00 +8);
        let range = get_time_range(Period::Daily, now, None, Some(DailyResetMode::Rolling));
        assert_eq!(range.start, now - Duration::hours(24));
        assert_eq!(range.reset_at, None);
    }

    #[test]
    fn weekly_starts_monday() {
        // 2026-07-28 is a Tuesday.
        let now = datetime!(2026-07-28 10:00:00 +8);
        let range = get_time_range(Period::Weekly, now, None, None);
        assert_eq!(range.start.weekday(), Weekday::Monday);
        assert_eq!(range.start, datetime!(2026-07-27 00:00:00 +8));
    }

    #[test]
    fn monthly_wraps_into_next_year() {
        let now = datetime!(2026-12-15 10:00:00 +8);
        let range = get_time_range(Period::Monthly, now, None, None);
        assert_eq!(range.start, datetime!(2026-12-01 00:00:00 +8));
        assert_eq!(range.reset_at, Some(datetime!(2027-01-01 00:00:00 +8)));
    }

    #[test]
    fn seconds_until_midnight_is_bounded_by_a_day() {
        let now = datetime!(2026-07-28 23:59:30 +8);
        assert_eq!(get_seconds_until_midnight(now), 30);
    }
}
