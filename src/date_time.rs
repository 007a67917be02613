use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serializer;

/// Fixed-width RFC 3339 encoding. Every stored timestamp uses this form so
/// that SQL string comparison matches chronological order.
pub fn encode(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Truncate to the precision the registry stores, so values read back compare equal
pub fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> {
    decode(&encode(&dt)).unwrap_or(dt)
}

pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&encode(dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_encoding_orders_lexicographically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + Duration::milliseconds(1500);
        assert_eq!(encode(&early), "2026-01-02T03:04:05.000000Z");
        assert!(encode(&early) < encode(&late));
    }

    #[test]
    fn test_round_trip_drops_sub_micro_precision() {
        let dt = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let truncated = truncate(dt);
        assert_eq!(decode(&encode(&dt)).unwrap(), truncated);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_456_000);
    }
}
