use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Cursor value for a container no log line has ever been accepted from.
pub const EPOCH: &str = "1970-01-01T00:00:00.000000000Z";

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Canonical cursor form: RFC3339 with exactly nine fractional digits and a
/// literal `Z`. Fixed width, so lexicographic order is chronological order.
pub fn rfc3339_nanos(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Converts an engine `timeNano` value into the canonical cursor form.
pub fn from_unix_nanos(nanos: i64) -> String {
    let seconds = nanos.div_euclid(i64::from(NANOS_PER_SECOND));
    let subsec = nanos.rem_euclid(i64::from(NANOS_PER_SECOND)) as u32;
    match Utc.timestamp_opt(seconds, subsec) {
        chrono::LocalResult::Single(timestamp) => rfc3339_nanos(timestamp),
        _ => EPOCH.to_string(),
    }
}

/// Renders `cursor + 1ns` as the engine's `since` query value,
/// `<secs>.<nnnnnnnnn>`. Built from integer parts; binary floating point
/// cannot represent nanosecond offsets faithfully.
pub fn since_query(cursor: &str) -> Result<String, chrono::ParseError> {
    let timestamp = DateTime::parse_from_rfc3339(cursor)?;
    let mut seconds = timestamp.timestamp();
    let mut nanos = timestamp.timestamp_subsec_nanos() + 1;
    if nanos >= NANOS_PER_SECOND {
        seconds += 1;
        nanos -= NANOS_PER_SECOND;
    }
    Ok(format!("{}.{:09}", seconds, nanos))
}

/// Unix seconds of a cursor, for the last-log-entry gauge.
pub fn unix_seconds(timestamp: &DateTime<chrono::FixedOffset>) -> f64 {
    timestamp.timestamp() as f64
        + f64::from(timestamp.timestamp_subsec_nanos()) / f64::from(NANOS_PER_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_canonical() {
        let parsed = DateTime::parse_from_rfc3339(EPOCH).unwrap();
        assert_eq!(rfc3339_nanos(parsed.with_timezone(&Utc)), EPOCH);
    }

    #[test]
    fn since_query_adds_one_nanosecond() {
        assert_eq!(since_query(EPOCH).unwrap(), "0.000000001");
        assert_eq!(
            since_query("2020-05-01T12:34:56.123456789Z").unwrap(),
            "1588336496.123456790"
        );
    }

    #[test]
    fn since_query_carries_into_seconds() {
        assert_eq!(
            since_query("2020-05-01T12:34:56.999999999Z").unwrap(),
            "1588336497.000000000"
        );
    }

    #[test]
    fn from_unix_nanos_round_trips() {
        let cursor = from_unix_nanos(1_588_336_496_123_456_789);
        assert_eq!(cursor, "2020-05-01T12:34:56.123456789Z");
    }

    #[test]
    fn canonical_form_orders_lexicographically() {
        let earlier = from_unix_nanos(1_588_336_496_000_000_001);
        let later = from_unix_nanos(1_588_336_496_000_000_002);
        assert!(earlier < later);
    }
}
