//! Date values as they appear in the feed and the store, and their `YYYY-MM-DD` mirrors.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A date-like value: epoch milliseconds from the CFP feed, or a date string from the
/// events feed (`2025-10-01`, sometimes a full ISO timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl DateValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, DateValue::Text(text) if text.trim().is_empty())
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateValue::Millis(ms) => write!(f, "{ms}"),
            DateValue::Fractional(value) => write!(f, "{value}"),
            DateValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for DateValue {
    fn from(ms: i64) -> Self {
        DateValue::Millis(ms)
    }
}

impl From<&str> for DateValue {
    fn from(text: &str) -> Self {
        DateValue::Text(text.to_string())
    }
}

/// Render a date value as `YYYY-MM-DD`.
///
/// Unknown string shapes degrade to their first ten characters; values with no usable
/// date at all (blank text, out-of-range epochs) yield `None`.
pub fn to_iso_date(value: &DateValue) -> Option<String> {
    match value {
        DateValue::Millis(ms) => millis_to_date(*ms),
        DateValue::Fractional(ms) if ms.is_finite() => millis_to_date(ms.trunc() as i64),
        DateValue::Fractional(_) => None,
        DateValue::Text(text) => text_to_date(text.trim()),
    }
}

/// Parse an RFC 3339 timestamp or epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn millis_to_date(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

fn text_to_date(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<i64>().ok().and_then(millis_to_date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    Some(text.chars().take(10).collect())
}
