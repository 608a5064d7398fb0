//! Temporal value types and their wire projections.
//!
//! Two wrappers are provided, differing only in how the graph serializer writes them:
//!
//! - [`StoreDateTime`] is written as the store-native BSON datetime.
//! - [`ExternalDateTime`] is written as an ISO-8601 string with offset, the form external
//!   JSON consumers expect.
//!
//! Both share the same construction rules. A numeric input is a Unix timestamp in seconds,
//! and an empty string or a literal zero yields the zero epoch instead of the current time,
//! so a missing value is never mistaken for "now". A value at the zero epoch reports
//! [`is_empty`](StoreDateTime::is_empty) but still serializes.
//!
//! Plain `chrono::DateTime<Utc>` fields are written as Unix seconds. Bind them back with
//! `#[serde(with = "docgraph::value::unix_seconds")]`. Loosely typed flags stored as
//! `"true"`, `1` or `"0"` are read with [`coerce_bool`] or the [`loose_bool`] adapter.

use std::{fmt, str::FromStr};

use bson::Bson;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::error::{DocumentStoreError, DocumentStoreResult};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn from_timestamp(seconds: i64) -> DocumentStoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| DocumentStoreError::Temporal(format!("timestamp {seconds} is out of range")))
}

/// Truncates a fractional timestamp. NaN and infinities are rejected.
fn from_fractional(seconds: f64) -> DocumentStoreResult<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(DocumentStoreError::Temporal(format!("timestamp {seconds} is not finite")));
    }
    from_timestamp(seconds.trunc() as i64)
}

/// Parses the textual input accepted by both temporal types.
fn parse_instant(input: &str) -> DocumentStoreResult<DateTime<FixedOffset>> {
    let input = input.trim();

    if input.is_empty() {
        return Ok(DateTime::<Utc>::UNIX_EPOCH.fixed_offset());
    }
    if input.eq_ignore_ascii_case("now") {
        return Ok(Utc::now().fixed_offset());
    }
    if let Ok(seconds) = input.parse::<i64>() {
        return Ok(from_timestamp(seconds)?.fixed_offset());
    }
    if let Ok(seconds) = input.parse::<f64>() {
        return Ok(from_fractional(seconds)?.fixed_offset());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed);
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(parsed.and_utc().fixed_offset());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().fixed_offset());
    }

    Err(DocumentStoreError::Temporal(format!("cannot parse '{input}' as a point in time")))
}

/// A point in time persisted as the store-native datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreDateTime(DateTime<Utc>);

impl StoreDateTime {
    /// The current instant.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The zero epoch, which reports [`is_empty`](Self::is_empty).
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Builds a value from a Unix timestamp in seconds. Zero yields the epoch.
    pub fn from_timestamp(seconds: i64) -> DocumentStoreResult<Self> {
        from_timestamp(seconds).map(Self)
    }

    /// Parses a timestamp string, an RFC 3339 string, or a naive UTC date/time.
    pub fn parse(input: &str) -> DocumentStoreResult<Self> {
        parse_instant(input).map(|instant| Self(instant.with_timezone(&Utc)))
    }

    /// Builds a value from the store-native datetime.
    pub fn from_store_form(value: bson::DateTime) -> Self {
        Self(value.to_chrono())
    }

    /// The store-native projection. Sub-millisecond precision is truncated.
    pub fn to_store_form(&self) -> bson::DateTime {
        bson::DateTime::from_chrono(self.0)
    }

    /// The external projection: RFC 3339 at second precision, always in UTC.
    pub fn to_external_form(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// The wrapped instant.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Unix timestamp in whole seconds.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Returns `true` exactly when the value is the zero epoch.
    pub fn is_empty(&self) -> bool {
        self.0 == DateTime::<Utc>::UNIX_EPOCH
    }
}

impl Default for StoreDateTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl From<DateTime<Utc>> for StoreDateTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl From<bson::DateTime> for StoreDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self::from_store_form(value)
    }
}

impl FromStr for StoreDateTime {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StoreDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_store_form().serialize(serializer)
    }
}

// Accepts the store-native datetime as well as the external forms, so an entity can be
// bound both from a stored document and from its external view.
impl<'de> Deserialize<'de> for StoreDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match Bson::deserialize(deserializer)? {
            Bson::DateTime(value) => Ok(Self::from_store_form(value)),
            Bson::String(text) => Self::parse(&text),
            Bson::Int32(seconds) => Self::from_timestamp(i64::from(seconds)),
            Bson::Int64(seconds) => Self::from_timestamp(seconds),
            Bson::Double(seconds) => from_fractional(seconds).map(Self),
            other => Err(DocumentStoreError::Temporal(format!(
                "cannot read {other} as a point in time"
            ))),
        };

        parsed.map_err(D::Error::custom)
    }
}

/// A point in time exposed to external consumers as an ISO-8601 string with offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExternalDateTime(DateTime<FixedOffset>);

impl ExternalDateTime {
    /// The current instant, in UTC.
    pub fn now() -> Self {
        Self(Utc::now().fixed_offset())
    }

    /// The zero epoch, which reports [`is_empty`](Self::is_empty).
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH.fixed_offset())
    }

    /// Builds a value from a Unix timestamp in seconds. Zero yields the epoch.
    pub fn from_timestamp(seconds: i64) -> DocumentStoreResult<Self> {
        from_timestamp(seconds).map(|instant| Self(instant.fixed_offset()))
    }

    /// Parses the external form. Numeric strings are Unix timestamps, and `""` or `"0"`
    /// yield the zero epoch.
    pub fn from_external_form(input: &str) -> DocumentStoreResult<Self> {
        parse_instant(input).map(Self)
    }

    /// The external projection: RFC 3339 at second precision, keeping the offset.
    pub fn to_external_form(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// The store-native projection. The offset is dropped.
    pub fn to_store_form(&self) -> bson::DateTime {
        bson::DateTime::from_chrono(self.0.with_timezone(&Utc))
    }

    /// The wrapped instant with its original offset.
    pub fn as_datetime(&self) -> &DateTime<FixedOffset> {
        &self.0
    }

    /// Unix timestamp in whole seconds.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Returns `true` exactly when the value is the zero epoch.
    pub fn is_empty(&self) -> bool {
        self.0 == DateTime::<Utc>::UNIX_EPOCH
    }
}

impl Default for ExternalDateTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl From<DateTime<FixedOffset>> for ExternalDateTime {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self(value)
    }
}

impl From<DateTime<Utc>> for ExternalDateTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.fixed_offset())
    }
}

impl FromStr for ExternalDateTime {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(s)
    }
}

impl fmt::Display for ExternalDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_external_form())
    }
}

impl Serialize for ExternalDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_external_form())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExternalRepr {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for ExternalDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match ExternalRepr::deserialize(deserializer)? {
            ExternalRepr::Seconds(seconds) => Self::from_timestamp(seconds),
            ExternalRepr::Fractional(seconds) => {
                from_fractional(seconds).map(|instant| Self(instant.fixed_offset()))
            }
            ExternalRepr::Text(text) => Self::from_external_form(&text),
        };

        parsed.map_err(D::Error::custom)
    }
}

/// Serde adapter storing a `DateTime<Utc>` as Unix seconds, the form the graph serializer
/// writes plain calendar values in.
///
/// ```ignore
/// #[derive(Deserialize, Entity)]
/// struct Event {
///     #[entity(id)]
///     id: Option<String>,
///     #[serde(with = "docgraph::value::unix_seconds")]
///     at: DateTime<Utc>,
/// }
/// ```
pub mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.timestamp())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        super::from_timestamp(seconds).map_err(D::Error::custom)
    }

    /// The same adapter for optional fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<i64>::deserialize(deserializer)?
                .map(|seconds| super::super::from_timestamp(seconds).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Reads a loosely typed flag.
///
/// `true`, `"true"`, `1` and `"1"` are true; `false`, `"false"`, `0` and `"0"` are false.
/// Anything else, including other numbers and other spellings, yields `None`.
pub fn coerce_bool(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(flag) => Some(*flag),
        Bson::Int32(1) | Bson::Int64(1) => Some(true),
        Bson::Int32(0) | Bson::Int64(0) => Some(false),
        Bson::String(text) => match text.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Serde adapter binding an `Option<bool>` through [`coerce_bool`].
///
/// Unrecognised values bind to `None` instead of failing.
pub mod loose_bool {
    use bson::Bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        Ok(super::coerce_bool(&Bson::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_and_zero_yield_epoch() {
        for input in ["", "0", "  "] {
            let value = ExternalDateTime::from_external_form(input).unwrap();
            assert!(value.is_empty(), "input {input:?}");
            assert_eq!(value.timestamp(), 0);
        }

        let store = StoreDateTime::parse("0").unwrap();
        assert!(store.is_empty());
        assert_eq!(StoreDateTime::from_timestamp(0).unwrap(), StoreDateTime::epoch());
    }

    #[test]
    fn test_numeric_input_is_unix_timestamp() {
        let value = ExternalDateTime::from_external_form("1076599161").unwrap();
        assert_eq!(value.timestamp(), 1_076_599_161);
        assert!(!value.is_empty());
        assert_eq!(value.to_external_form(), "2004-02-12T15:19:21+00:00");
    }

    #[test]
    fn test_external_form_keeps_offset() {
        let value = ExternalDateTime::from_external_form("2004-02-12T15:19:21+02:00").unwrap();
        assert_eq!(value.to_external_form(), "2004-02-12T15:19:21+02:00");
        assert_eq!(value.timestamp(), 1_076_591_961);
    }

    #[test]
    fn test_naive_input_is_utc() {
        let value = StoreDateTime::parse("2020-01-02 03:04:05").unwrap();
        assert_eq!(value.to_external_form(), "2020-01-02T03:04:05+00:00");

        let date = StoreDateTime::parse("2020-01-02").unwrap();
        assert_eq!(date.to_external_form(), "2020-01-02T00:00:00+00:00");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            StoreDateTime::parse("yesterday-ish"),
            Err(DocumentStoreError::Temporal(_))
        ));
    }

    #[test]
    fn test_store_form_round_trip() {
        let value = StoreDateTime::from_timestamp(1_600_000_000).unwrap();
        let native = value.to_store_form();
        assert_eq!(native.timestamp_millis(), 1_600_000_000_000);
        assert_eq!(StoreDateTime::from_store_form(native), value);
    }

    #[test]
    fn test_epoch_still_has_store_form() {
        assert_eq!(StoreDateTime::epoch().to_store_form().timestamp_millis(), 0);
        assert_eq!(ExternalDateTime::epoch().to_external_form(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_external_deserializes_from_number_or_string() {
        let from_number: ExternalDateTime = serde_json::from_str("1076599161").unwrap();
        let from_text: ExternalDateTime = serde_json::from_str("\"2004-02-12T15:19:21+00:00\"").unwrap();
        assert_eq!(from_number, from_text);

        let empty: ExternalDateTime = serde_json::from_str("\"\"").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        for input in ["NaN", "inf", "-infinity"] {
            assert!(
                matches!(StoreDateTime::parse(input), Err(DocumentStoreError::Temporal(_))),
                "input {input:?}"
            );
        }
        assert!(serde_json::from_str::<ExternalDateTime>("\"NaN\"").is_err());
    }

    #[test]
    fn test_store_deserializes_from_native_and_external_forms() {
        let native: StoreDateTime =
            bson::deserialize_from_bson(Bson::DateTime(bson::DateTime::from_millis(1_000)))
                .unwrap();
        assert_eq!(native.timestamp(), 1);

        let text: StoreDateTime = serde_json::from_str("\"2004-02-12T15:19:21+00:00\"").unwrap();
        let number: StoreDateTime = serde_json::from_str("1076599161").unwrap();
        assert_eq!(text, number);
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Stamp {
        #[serde(with = "unix_seconds")]
        at: DateTime<Utc>,
        #[serde(with = "unix_seconds::option", default)]
        until: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_unix_seconds_adapter() {
        let stamp: Stamp =
            bson::deserialize_from_document(bson::doc! { "at": 1_076_599_161_i64, "until": null })
                .unwrap();
        assert_eq!(stamp.at.timestamp(), 1_076_599_161);
        assert_eq!(stamp.until, None);

        let written = bson::serialize_to_document(&stamp).unwrap();
        assert_eq!(written.get_i64("at").unwrap(), 1_076_599_161);
    }

    #[test]
    fn test_coerce_bool() {
        for truthy in [Bson::Boolean(true), Bson::Int32(1), Bson::Int64(1), "true".into(), "1".into()] {
            assert_eq!(coerce_bool(&truthy), Some(true), "{truthy}");
        }
        for falsy in [Bson::Boolean(false), Bson::Int32(0), "false".into(), "0".into()] {
            assert_eq!(coerce_bool(&falsy), Some(false), "{falsy}");
        }
        for other in [Bson::Null, Bson::Int32(2), Bson::Double(1.0), "yes".into(), "TRUE".into()] {
            assert_eq!(coerce_bool(&other), None, "{other}");
        }
    }

    #[derive(Debug, Deserialize)]
    struct Flags {
        #[serde(with = "loose_bool", default)]
        active: Option<bool>,
    }

    #[test]
    fn test_loose_bool_adapter() {
        let flags: Flags = serde_json::from_str(r#"{ "active": "1" }"#).unwrap();
        assert_eq!(flags.active, Some(true));

        let flags: Flags = bson::deserialize_from_document(bson::doc! { "active": "maybe" }).unwrap();
        assert_eq!(flags.active, None);
    }
}
