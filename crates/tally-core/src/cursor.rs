//! Opaque pagination cursors.
//!
//! A cursor is `base64(JSON({"v": <sort value>, "id": <row id>}))` -- the
//! last row's sort-field value plus its id as tie-break. Pages continue
//! strictly past the (value, id) pair, so duplicate sort values neither drop
//! nor repeat rows across pages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Decoded cursor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// The last row's sort-field value (string, number, or null).
    pub v: serde_json::Value,
    /// The last row's id.
    pub id: String,
}

/// Returned when a cursor string cannot be decoded.
#[derive(Debug, thiserror::Error)]
#[error("invalid cursor: {0}")]
pub struct InvalidCursor(pub String);

impl Cursor {
    /// Builds a cursor from the last row of a page.
    pub fn new(value: serde_json::Value, id: impl Into<String>) -> Self {
        Self {
            v: value,
            id: id.into(),
        }
    }

    /// Encodes to the opaque wire form.
    pub fn encode(&self) -> String {
        // Serialization of Value + String cannot fail.
        let json = serde_json::to_vec(self).expect("cursor serializes");
        STANDARD.encode(json)
    }

    /// Decodes the opaque wire form.
    pub fn decode(s: &str) -> Result<Self, InvalidCursor> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| InvalidCursor(format!("not base64: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| InvalidCursor(format!("not cursor JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_string_value() {
        let c = Cursor::new(serde_json::json!("2024-08-01T00:00:00.000Z"), "job-42");
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn round_trip_numeric_value() {
        let c = Cursor::new(serde_json::json!(12.5), "job-7");
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(decoded.id, "job-7");
        assert_eq!(decoded.v, serde_json::json!(12.5));
    }

    #[test]
    fn round_trip_null_value() {
        let c = Cursor::new(serde_json::Value::Null, "job-9");
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert!(decoded.v.is_null());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Cursor::decode("not-base64!!").is_err());
        // Valid base64 but not cursor JSON.
        let b64 = STANDARD.encode(b"[1,2,3]");
        assert!(Cursor::decode(&b64).is_err());
    }
}
