//! Credential validity windows.
//!
//! A credential's end is given either as an absolute RFC3339 timestamp or as
//! a duration relative to now, never both. With neither, the credential
//! expires one year from now; credentials are never silently permanent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};

/// Lifetime applied when no end is configured.
pub const DEFAULT_CREDENTIAL_LIFETIME_DAYS: i64 = 365;

/// Resolved validity window of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Parse an RFC3339 timestamp into UTC.
pub fn parse_timestamp(field: &'static str, raw: &str) -> ReconcileResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| ReconcileError::InvalidTimestamp {
            field,
            value: raw.to_string(),
            source,
        })
}

/// Resolve the effective start and end of a credential.
///
/// Precedence: both ends set is a conflict; an absolute end wins; then a
/// relative end from `now`; then `now` plus one year. Start defaults to
/// `now`. The result must satisfy `end > start`.
pub fn resolve(
    start_raw: Option<&str>,
    end_raw: Option<&str>,
    end_relative: Option<Duration>,
    now: DateTime<Utc>,
) -> ReconcileResult<TimeWindow> {
    let end = match (end_raw, end_relative) {
        (Some(_), Some(_)) => {
            return Err(ReconcileError::conflicting(
                "end_date and end_date_relative are mutually exclusive",
            ))
        }
        (Some(raw), None) => parse_timestamp("end_date", raw)?,
        (None, Some(relative)) => offset(now, relative)?,
        (None, None) => offset(now, Duration::days(DEFAULT_CREDENTIAL_LIFETIME_DAYS))?,
    };

    let start = match start_raw {
        Some(raw) => parse_timestamp("start_date", raw)?,
        None => now,
    };

    if end <= start {
        return Err(ReconcileError::InvalidWindow { start, end });
    }

    Ok(TimeWindow { start, end })
}

/// `now + delta`, rejecting results outside the representable date range.
fn offset(now: DateTime<Utc>, delta: Duration) -> ReconcileResult<DateTime<Utc>> {
    now.checked_add_signed(delta).ok_or_else(|| {
        ReconcileError::invalid_duration(delta.to_string(), "end date out of range")
    })
}

/// Parse a relative duration such as `"8760h"` or `"1h30m"`.
///
/// Accepts a sequence of decimal numbers, each with an optional fraction and
/// a unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). The result must be
/// strictly positive.
pub fn parse_relative_duration(raw: &str) -> ReconcileResult<Duration> {
    let invalid = |reason: &str| ReconcileError::invalid_duration(raw, reason);

    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s.starts_with('-') {
        return Err(invalid("duration must be positive"));
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);

    let mut total_nanos: i128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_num) = match after_int.strip_prefix('.') {
            Some(frac) => {
                let frac_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
                frac.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("expected a number"));
        }

        let unit_len = after_num
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_num.len());
        let (unit, tail) = after_num.split_at(unit_len);
        let unit_nanos: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        let whole: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("number out of range"))?
        };
        total_nanos = total_nanos
            .checked_add(whole.checked_mul(unit_nanos).ok_or_else(|| invalid("overflow"))?)
            .ok_or_else(|| invalid("overflow"))?;

        if !frac_part.is_empty() {
            // Digits beyond nanosecond precision cannot change the result.
            let digits = &frac_part[..frac_part.len().min(18)];
            let numerator: i128 = digits.parse().map_err(|_| invalid("bad fraction"))?;
            let scale = 10_i128.pow(digits.len() as u32);
            total_nanos += numerator * unit_nanos / scale;
        }

        rest = tail;
    }

    if total_nanos <= 0 {
        return Err(invalid("duration must be positive"));
    }
    let nanos = i64::try_from(total_nanos).map_err(|_| invalid("overflow"))?;
    Ok(Duration::nanoseconds(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_default_is_one_year() {
        let window = resolve(None, None, None, now()).unwrap();
        assert_eq!(window.start, now());
        assert_eq!(window.end, now() + Duration::days(365));
    }

    #[test]
    fn test_default_against_wall_clock() {
        let before = Utc::now();
        let window = resolve(None, None, None, Utc::now()).unwrap();
        let drift = window.end - (before + Duration::days(365));
        assert!(drift >= Duration::zero() && drift < Duration::seconds(5));
    }

    #[test]
    fn test_absolute_end() {
        let window = resolve(None, Some("2099-01-01T01:02:03Z"), None, now()).unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2099, 1, 1, 1, 2, 3).unwrap());
    }

    #[test]
    fn test_absolute_end_with_offset_normalizes_to_utc() {
        let window = resolve(None, Some("2099-01-01T03:02:03+02:00"), None, now()).unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2099, 1, 1, 1, 2, 3).unwrap());
    }

    #[test]
    fn test_relative_end() {
        let window = resolve(None, None, Some(Duration::hours(8760)), now()).unwrap();
        assert_eq!(window.end, now() + Duration::hours(8760));
    }

    #[test]
    fn test_relative_end_out_of_range() {
        let err = resolve(None, None, Some(Duration::days(365 * 300_000)), now()).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidDuration { .. }));
        assert!(err.is_validation());

        // The largest duration the parser accepts still resolves.
        let relative = parse_relative_duration("2562047h").unwrap();
        assert!(resolve(None, None, Some(relative), now()).is_ok());
    }

    #[test]
    fn test_both_ends_conflict() {
        let err = resolve(
            None,
            Some("2099-01-01T01:02:03Z"),
            Some(Duration::hours(1)),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictingConfiguration { .. }));
    }

    #[test]
    fn test_invalid_end_timestamp() {
        let err = resolve(None, Some("next tuesday"), None, now()).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::InvalidTimestamp { field: "end_date", .. }
        ));
    }

    #[test]
    fn test_explicit_start() {
        let window = resolve(
            Some("2098-06-01T00:00:00Z"),
            Some("2099-01-01T01:02:03Z"),
            None,
            now(),
        )
        .unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2098, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_inverted_window() {
        let err = resolve(
            Some("2099-06-01T00:00:00Z"),
            Some("2099-01-01T01:02:03Z"),
            None,
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidWindow { .. }));
    }

    #[test]
    fn test_start_after_default_end() {
        let err = resolve(Some("2030-01-01T00:00:00Z"), None, None, now()).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidWindow { .. }));
    }

    #[test]
    fn test_window_contains() {
        let window = resolve(None, None, Some(Duration::hours(1)), now()).unwrap();
        assert!(window.contains(now()));
        assert!(!window.contains(now() + Duration::hours(1)));
        assert_eq!(window.duration(), Duration::hours(1));
    }

    #[test]
    fn test_parse_relative_duration() {
        assert_eq!(parse_relative_duration("8760h").unwrap(), Duration::hours(8760));
        assert_eq!(parse_relative_duration("4320h").unwrap(), Duration::hours(4320));
        assert_eq!(
            parse_relative_duration("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(
            parse_relative_duration("1.5h").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(
            parse_relative_duration("250ms").unwrap(),
            Duration::milliseconds(250)
        );
        assert_eq!(parse_relative_duration("+10s").unwrap(), Duration::seconds(10));
    }

    #[test]
    fn test_parse_relative_duration_rejects() {
        for raw in ["", "h", "10", "10d", "-1h", "0s", "1h-5m", "1.h.5"] {
            let err = parse_relative_duration(raw).unwrap_err();
            assert!(
                matches!(err, ReconcileError::InvalidDuration { .. }),
                "{raw:?} should be rejected"
            );
        }
    }
}
