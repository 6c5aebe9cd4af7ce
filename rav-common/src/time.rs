//! Timestamp helpers
//!
//! All timestamps are persisted as RFC 3339 UTC strings with millisecond
//! precision and a `Z` suffix, so lexical comparison in SQL matches
//! chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Format a timestamp for storage
pub fn to_db_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted for storage
pub fn now_db_string() -> String {
    to_db_string(Utc::now())
}

/// Parse a stored timestamp
pub fn parse_db_string(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn parse_optional(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_db_string).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_round_trip_preserves_millis() {
        let now = Utc::now();
        let parsed = parse_db_string(&to_db_string(now)).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let earlier = Utc::now();
        let later = earlier + Duration::milliseconds(1500);
        assert!(to_db_string(earlier) < to_db_string(later));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_db_string("yesterday").is_err());
    }
}
