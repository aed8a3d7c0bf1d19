//! Billing period boundaries.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::config::PeriodKind;

/// Half-open `[start, end)` period containing `now`.
pub fn period_bounds(kind: PeriodKind, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    match kind {
        PeriodKind::CalendarMonth => calendar_month(now),
        PeriodKind::RollingDays { days } => rolling_days(now, days.max(1)),
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn calendar_month(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = month_start(now.year(), now.month());
    let end = if now.month() == 12 {
        month_start(now.year() + 1, 1)
    } else {
        month_start(now.year(), now.month() + 1)
    };
    (start, end)
}

/// Fixed-length windows anchored at the unix epoch.
fn rolling_days(now: DateTime<Utc>, days: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let len = i64::from(days) * 86_400;
    let start_secs = now.timestamp().div_euclid(len) * len;
    let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
    (start, start + Duration::seconds(len))
}
