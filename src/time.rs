//! Time & period arithmetic.
//!
//! Timestamps are UTC instants serialized as a fixed ISO-8601 textual form
//! with second precision. Bill and reporting periods are measured relative
//! to `adapter_start_time`, never aligned to wall-clock month/day boundaries.

use chrono::{DateTime, Utc};

use crate::error::AdapterError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC instant.
pub fn get_now() -> DateTime<Utc> {
    Utc::now()
}

/// The instant `billing_interval` seconds after `t`.
pub fn next_bill_time(t: DateTime<Utc>, billing_interval: u64) -> DateTime<Utc> {
    t + chrono::Duration::seconds(billing_interval as i64)
}

/// The instant `billing_interval` seconds before `t`.
pub fn prev_bill_time(t: DateTime<Utc>, billing_interval: u64) -> DateTime<Utc> {
    t - chrono::Duration::seconds(billing_interval as i64)
}

/// Format a timestamp as the adapter's fixed ISO-8601 textual form.
pub fn date_to_string(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp previously produced by [`date_to_string`].
pub fn string_to_date(s: &str) -> Result<DateTime<Utc>, AdapterError> {
    DateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AdapterError::Persistence(format!("invalid timestamp '{s}': {e}")))
}

/// `serde` helper module for (de)serializing `DateTime<Utc>` through the
/// adapter's fixed textual form instead of chrono's default RFC 3339.
pub mod ts_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{date_to_string, string_to_date};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date_to_string(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        string_to_date(&s).map_err(serde::de::Error::custom)
    }
}

/// `serde` helper module for `Option<DateTime<Utc>>` fields, using the same
/// fixed textual form as [`ts_format`].
pub mod ts_format_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{date_to_string, string_to_date};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&date_to_string(*value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| string_to_date(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
