use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::models::Granularity;

// ── Period boundaries ─────────────────────────────────────────────────────────

/// First calendar day of the period containing `date`.
///
/// Weeks follow ISO 8601 and start on Monday; months start on the 1st.
pub fn period_start(date: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Daily => date,
        Granularity::Weekly => {
            let offset = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(offset)).unwrap_or(date)
        }
        Granularity::Monthly => date.with_day(1).unwrap_or(date),
    }
}

/// Last calendar day of the period that starts at `start`.
pub fn period_end(start: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Daily => start,
        Granularity::Weekly => start.checked_add_days(Days::new(6)).unwrap_or(start),
        Granularity::Monthly => start
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1)))
            .and_then(|next| next.pred_opt())
            .unwrap_or(start),
    }
}

/// Number of calendar days in the period that starts at `start`.
pub fn days_in_period(start: NaiveDate, granularity: Granularity) -> u32 {
    let end = period_end(start, granularity);
    (end - start).num_days() as u32 + 1
}

/// Human-readable period label.
///
/// `"2024-01-15"` (daily), `"2024-W03"` (weekly, ISO week-year) or
/// `"2024-01"` (monthly).
pub fn period_key(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Daily => date.format("%Y-%m-%d").to_string(),
        Granularity::Weekly => {
            let iso = date.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        Granularity::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// Every calendar date strictly between `from` and `to`.
pub fn dates_between(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days()
        .skip(1)
        .take_while(|d| *d < to)
        .collect()
}

// ── Date parsing ──────────────────────────────────────────────────────────────

/// Date-only patterns accepted in raw input, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d-%b-%Y",
    "%Y/%m/%d",
];

/// Date-time patterns whose time part is discarded.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a calendar date from the variety of formats found in published
/// tables. Returns `None` for empty or unrecognised strings.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    // RFC 3339 with an offset: keep the calendar date as written.
    let normalised = if let Some(stripped) = s.strip_suffix('Z') {
        format!("{}+00:00", stripped)
    } else {
        s.to_string()
    };
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&normalised) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.date());
        }
    }

    warn!("parse_date: could not parse date string \"{}\"", s);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── period_start ──────────────────────────────────────────────────────

    #[test]
    fn test_period_start_weekly_is_monday() {
        // 2024-01-17 is a Wednesday.
        assert_eq!(period_start(ymd(2024, 1, 17), Granularity::Weekly), ymd(2024, 1, 15));
        // Sunday belongs to the week that started the previous Monday.
        assert_eq!(period_start(ymd(2024, 1, 21), Granularity::Weekly), ymd(2024, 1, 15));
        // Monday is its own week start.
        assert_eq!(period_start(ymd(2024, 1, 22), Granularity::Weekly), ymd(2024, 1, 22));
    }

    #[test]
    fn test_period_start_weekly_crosses_year() {
        // 2025-01-01 is a Wednesday; its ISO week starts 2024-12-30.
        assert_eq!(period_start(ymd(2025, 1, 1), Granularity::Weekly), ymd(2024, 12, 30));
    }

    #[test]
    fn test_period_start_monthly_and_daily() {
        assert_eq!(period_start(ymd(2024, 2, 29), Granularity::Monthly), ymd(2024, 2, 1));
        assert_eq!(period_start(ymd(2024, 2, 29), Granularity::Daily), ymd(2024, 2, 29));
    }

    // ── period_end / days_in_period ───────────────────────────────────────

    #[test]
    fn test_period_end_monthly_handles_leap_and_december() {
        assert_eq!(period_end(ymd(2024, 2, 1), Granularity::Monthly), ymd(2024, 2, 29));
        assert_eq!(period_end(ymd(2023, 2, 1), Granularity::Monthly), ymd(2023, 2, 28));
        assert_eq!(period_end(ymd(2024, 12, 1), Granularity::Monthly), ymd(2024, 12, 31));
    }

    #[test]
    fn test_days_in_period() {
        assert_eq!(days_in_period(ymd(2024, 1, 15), Granularity::Daily), 1);
        assert_eq!(days_in_period(ymd(2024, 1, 15), Granularity::Weekly), 7);
        assert_eq!(days_in_period(ymd(2024, 4, 1), Granularity::Monthly), 30);
    }

    // ── period_key ────────────────────────────────────────────────────────

    #[test]
    fn test_period_key_formats() {
        assert_eq!(period_key(ymd(2024, 1, 5), Granularity::Daily), "2024-01-05");
        assert_eq!(period_key(ymd(2024, 1, 5), Granularity::Monthly), "2024-01");
        // ISO week-year differs from the calendar year here.
        assert_eq!(period_key(ymd(2024, 12, 30), Granularity::Weekly), "2025-W01");
    }

    // ── dates_between ─────────────────────────────────────────────────────

    #[test]
    fn test_dates_between_is_exclusive() {
        let between = dates_between(ymd(2024, 1, 1), ymd(2024, 1, 4));
        assert_eq!(between, vec![ymd(2024, 1, 2), ymd(2024, 1, 3)]);
        assert!(dates_between(ymd(2024, 1, 1), ymd(2024, 1, 2)).is_empty());
    }

    // ── parse_date ────────────────────────────────────────────────────────

    #[test]
    fn test_parse_date_accepts_published_formats() {
        let expected = Some(ymd(2023, 12, 3));
        assert_eq!(parse_date("2023-12-03"), expected);
        assert_eq!(parse_date("12/03/2023"), expected);
        assert_eq!(parse_date("December 3, 2023"), expected);
        assert_eq!(parse_date("Dec 3, 2023"), expected);
        assert_eq!(parse_date("03-Dec-2023"), expected);
        assert_eq!(parse_date("2023-12-03T00:00:00"), expected);
        assert_eq!(parse_date("2023-12-03T10:00:00Z"), expected);
        assert_eq!(parse_date("  2023-12-03  "), expected);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2023-13-45"), None);
    }
}
