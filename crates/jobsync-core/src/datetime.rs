//! Relative ("3 hours ago") and ISO-8601 timestamp parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

/// Months and years are fixed-length approximations, not calendar arithmetic.
pub const DAYS_PER_MONTH: i64 = 30;
pub const DAYS_PER_YEAR: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelativeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RelativeUnit {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "minute" | "minutes" => Some(Self::Minute),
            "hour" | "hours" => Some(Self::Hour),
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            "month" | "months" => Some(Self::Month),
            "year" | "years" => Some(Self::Year),
            _ => None,
        }
    }

    fn times(self, amount: i64) -> Option<TimeDelta> {
        match self {
            Self::Minute => TimeDelta::try_minutes(amount),
            Self::Hour => TimeDelta::try_hours(amount),
            Self::Day => TimeDelta::try_days(amount),
            Self::Week => TimeDelta::try_weeks(amount),
            Self::Month => TimeDelta::try_days(amount.checked_mul(DAYS_PER_MONTH)?),
            Self::Year => TimeDelta::try_days(amount.checked_mul(DAYS_PER_YEAR)?),
        }
    }
}

fn relative_offset(text: &str) -> Option<TimeDelta> {
    let normalized = text.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "yesterday" => return TimeDelta::try_days(1),
        "last week" => return TimeDelta::try_weeks(1),
        "last month" => return TimeDelta::try_days(DAYS_PER_MONTH),
        "last year" => return TimeDelta::try_days(DAYS_PER_YEAR),
        _ => {}
    }

    let parts = normalized.split_whitespace().collect::<Vec<_>>();
    let [amount, unit, "ago"] = parts.as_slice() else {
        return None;
    };
    let amount = i64::from(amount.parse::<u32>().ok()?);
    RelativeUnit::parse(unit)?.times(amount)
}

/// Resolve a marketplace-style relative timestamp against `reference`.
///
/// Returns `(reference, false)` for anything unrecognized; callers keep the
/// record and use the reference instant as a placeholder.
pub fn parse_relative_time(text: &str, reference: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    match relative_offset(text).and_then(|offset| reference.checked_sub_signed(offset)) {
        Some(instant) => (instant, true),
        None => (reference, false),
    }
}

/// Best-effort ISO-8601 parse used for stored date cells.
///
/// Accepts RFC 3339 (`Z` or numeric offset), offset-less date-times (read as
/// UTC) and bare dates (midnight UTC).
pub fn parse_iso_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn n_units_ago_subtracts_exact_offsets() {
        let r = reference();
        let cases = [
            ("3 hours ago", TimeDelta::hours(3)),
            ("1 hour ago", TimeDelta::hours(1)),
            ("57 minutes ago", TimeDelta::minutes(57)),
            ("1 minute ago", TimeDelta::minutes(1)),
            ("2 days ago", TimeDelta::days(2)),
            ("2 weeks ago", TimeDelta::weeks(2)),
            ("2 months ago", TimeDelta::days(60)),
            ("1 year ago", TimeDelta::days(365)),
            ("3 years ago", TimeDelta::days(3 * 365)),
        ];
        for (text, offset) in cases {
            assert_eq!(parse_relative_time(text, r), (r - offset, true), "{text}");
        }
    }

    #[test]
    fn literal_forms_use_fixed_approximations() {
        let r = reference();
        assert_eq!(parse_relative_time("yesterday", r), (r - TimeDelta::days(1), true));
        assert_eq!(parse_relative_time("last week", r), (r - TimeDelta::days(7), true));
        assert_eq!(parse_relative_time("last month", r), (r - TimeDelta::days(30), true));
        assert_eq!(parse_relative_time("last year", r), (r - TimeDelta::days(365), true));
    }

    #[test]
    fn surrounding_whitespace_and_case_are_ignored() {
        let r = reference();
        assert_eq!(
            parse_relative_time("  5 Hours ago\n", r),
            (r - TimeDelta::hours(5), true)
        );
        assert_eq!(parse_relative_time("Yesterday", r), (r - TimeDelta::days(1), true));
    }

    #[test]
    fn unrecognized_input_returns_reference() {
        let r = reference();
        for text in [
            "",
            "just now",
            "an hour ago",
            "3 fortnights ago",
            "three hours ago",
            "-3 hours ago",
            "3 hours",
            "3 hours from now",
            "posted 3 hours ago",
        ] {
            assert_eq!(parse_relative_time(text, r), (r, false), "{text:?}");
        }
    }

    #[test]
    fn out_of_range_offsets_are_unrecognized() {
        let r = reference();
        assert_eq!(parse_relative_time("4000000000 years ago", r), (r, false));
    }

    #[test]
    fn iso_instants_tolerate_z_offsets_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap();
        assert_eq!(parse_iso_instant("2026-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_iso_instant("2026-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_iso_instant("2026-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_iso_instant("2026-01-02T03:04:05.000000Z"), Some(expected));
        assert_eq!(
            parse_iso_instant("2026-01-02"),
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).single()
        );
        assert_eq!(parse_iso_instant("not a date"), None);
        assert_eq!(parse_iso_instant("  "), None);
    }
}
