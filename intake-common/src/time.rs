//! Timestamp utilities

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Get current UTC timestamp, truncated to the precision the database keeps
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp for storage (RFC 3339, microsecond precision, `Z` suffix)
pub fn to_db_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp back into UTC
pub fn parse_db_string(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", s, e)))
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_now_survives_storage() {
        let ts = now();
        assert_eq!(parse_db_string(&to_db_string(ts)).unwrap(), ts);
    }

    #[test]
    fn test_db_string_keeps_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let s = to_db_string(ts);
        assert_eq!(s, "2024-03-01T09:30:00.123456Z");
        assert_eq!(parse_db_string(&s).unwrap(), ts);
    }

    #[test]
    fn test_db_strings_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert!(to_db_string(earlier) < to_db_string(later));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_db_string("yesterday").is_err());
    }

    #[test]
    fn test_millis_to_duration_one_second() {
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }
}
