//! Fixed-width timestamp encoding.
//!
//! Documents store timestamps as RFC 3339 strings with exactly six
//! fractional digits and a `Z` suffix (`2026-01-02T03:04:05.000006Z`).
//! Because every value has the same width, lexical string order equals
//! chronological order, which lets range filters and sorts work on the raw
//! JSON string in every backend.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp in the fixed-width document encoding.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp previously written by [`format`] (or any RFC 3339 value).
pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for `DateTime<Utc>` fields using the fixed-width encoding.
pub mod serde_ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize with [`super::format`].
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format(ts))
    }

    /// Deserialize with [`super::parse`].
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields using the fixed-width encoding.
pub mod serde_ts_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize `Some` with [`super::format`], `None` as null.
    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        let Some(ts) = ts else {
            return s.serialize_none();
        };
        s.serialize_some(&super::format(ts))
    }

    /// Deserialize an optional fixed-width timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
