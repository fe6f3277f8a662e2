//! Payload date extraction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::errors::RetentionError;

/// Payload fields that may carry an event's business date, in lookup order.
pub const DATE_FIELDS: [&str; 9] = [
    "createdDateTime",
    "dateTime",
    "entryDateTime",
    "completionDateTime",
    "lastStockTransferDate",
    "deliveryDateTime",
    "datetime",
    "orderCreatedDateTime",
    "dt",
];

const NAIVE_DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a date as written by producers or operators.
///
/// Accepts RFC 3339 timestamps, timestamps without an offset (taken as UTC)
/// and bare dates (midnight UTC).
pub fn parse_date_text(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Extract the business date of an event from its JSON payload.
///
/// The first of [`DATE_FIELDS`] holding a non-null value wins; a present but
/// unparseable value is an error rather than a reason to try the next field.
pub fn extract_event_date(payload: &Value) -> Result<DateTime<Utc>, RetentionError> {
    let found = DATE_FIELDS.iter().find_map(|field| {
        payload
            .get(field)
            .filter(|value| !value.is_null())
            .map(|value| (*field, value))
    });

    let Some((field, value)) = found else {
        return Err(RetentionError::MissingDate {
            expected: DATE_FIELDS.join(", "),
        });
    };

    value
        .as_str()
        .and_then(parse_date_text)
        .ok_or_else(|| RetentionError::InvalidDate {
            field: field.to_string(),
            value: value.to_string(),
        })
}
