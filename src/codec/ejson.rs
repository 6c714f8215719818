//! Extended JSON scalar helpers.
//!
//! The wire format carries a few values plain JSON cannot express: dates
//! travel as `{"$date": <milliseconds since epoch>}` and binary blobs as
//! `{"$binary": <base64>}`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Encode a timestamp as an extended JSON date.
#[must_use]
pub fn date(value: DateTime<Utc>) -> Value {
    json!({ "$date": value.timestamp_millis() })
}

/// Decode an extended JSON date, if `value` is one.
#[must_use]
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value.get("$date")?.as_i64()?)
}

/// Encode a binary blob as an extended JSON value.
#[must_use]
pub fn binary(value: &[u8]) -> Value {
    json!({ "$binary": STANDARD.encode(value) })
}

/// Decode an extended JSON binary value, if `value` is one.
#[must_use]
pub fn as_binary(value: &Value) -> Option<Bytes> {
    STANDARD
        .decode(value.get("$binary")?.as_str()?)
        .ok()
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn date_round_trips_at_millisecond_precision() {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let encoded = date(stamp);
        assert_eq!(encoded["$date"], stamp.timestamp_millis());
        assert_eq!(as_date(&encoded), Some(stamp));
    }

    #[test]
    fn as_date_rejects_other_shapes() {
        assert_eq!(as_date(&json!("2024-05-17")), None);
        assert_eq!(as_date(&json!({ "$date": "not-a-number" })), None);
    }

    #[test]
    fn binary_round_trips() {
        let encoded = binary(b"\x00\x01frame");
        assert_eq!(as_binary(&encoded).as_deref(), Some(&b"\x00\x01frame"[..]));
        assert_eq!(as_binary(&json!({})), None);
    }
}
