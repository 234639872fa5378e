// elspeth-store-sqlite/src/codec.rs
// ============================================================================
// Module: Row Codec Helpers
// Description: Conversions between core entity types and the TEXT columns
//              they are stored in.
// Purpose: Reuse the entities' own `snake_case` serde representation for
//          every closed-set enum column, rather than hand-writing a second
//          string mapping per enum.
// Dependencies: elspeth-core, serde, serde_json, time
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::SqliteError;

/// Renders a `snake_case`-serializing enum as its bare string form, for
/// storage in a TEXT column.
///
/// # Errors
///
/// Returns [`SqliteError::Invalid`] if `value` does not serialize to a JSON
/// string (true of every enum this is used with; failure here means a type
/// was passed that was never meant to go through this helper).
pub fn enum_to_text<T: Serialize>(value: &T) -> Result<String, SqliteError> {
    match serde_json::to_value(value).map_err(|err| SqliteError::Invalid(err.to_string()))? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(SqliteError::Invalid(format!("expected string-serializing enum, got {other}"))),
    }
}

/// Parses a TEXT column back into a `snake_case`-deserializing enum.
///
/// # Errors
///
/// Returns [`SqliteError::Corrupt`] if `text` is not one of the enum's known
/// variants; this is a Tier-1 read failure, not a recoverable one.
pub fn text_to_enum<T: DeserializeOwned>(text: &str) -> Result<T, SqliteError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|err| SqliteError::Corrupt(format!("unknown enum value {text:?}: {err}")))
}

/// Formats a `Timestamp` as RFC 3339 text for storage.
///
/// # Errors
///
/// Returns [`SqliteError::Invalid`] if formatting fails.
pub fn timestamp_to_text(value: elspeth_core::Timestamp) -> Result<String, SqliteError> {
    value.as_offset_date_time().format(&Rfc3339).map_err(|err| SqliteError::Invalid(err.to_string()))
}

/// Parses RFC 3339 text back into a `Timestamp`.
///
/// # Errors
///
/// Returns [`SqliteError::Corrupt`] if `text` is not valid RFC 3339.
pub fn timestamp_from_text(text: &str) -> Result<elspeth_core::Timestamp, SqliteError> {
    let parsed = OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|err| SqliteError::Corrupt(format!("invalid timestamp {text:?}: {err}")))?;
    Ok(elspeth_core::Timestamp::new(parsed))
}
