//! Shared SQL helpers: TEXT timestamp codec and WHERE-clause assembly.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). JSON blobs are TEXT.
//! All user-supplied values bind through placeholders; no value is ever
//! interpolated into SQL text.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;

// ---------------------------------------------------------------------------
// Timestamp codec
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try full RFC 3339 first, then common SQLite formats.
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Formats a calendar date as `YYYY-MM-DD` TEXT.
pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parses a `YYYY-MM-DD` TEXT date, falling back to the epoch on garbage.
pub fn parse_date(s: &str) -> NaiveDate {
    s.parse()
        .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
}

// ---------------------------------------------------------------------------
// WHERE assembly
// ---------------------------------------------------------------------------

/// Accumulates AND-joined WHERE clauses with their boxed bind parameters.
///
/// Clauses use `?` placeholders in push order; [`SqlWhere::sql`] renders the
/// final fragment and [`SqlWhere::params`] yields the matching bind slice.
#[derive(Default)]
pub struct SqlWhere {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl SqlWhere {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause with one bound value, e.g. `push("status = ?", v)`.
    pub fn push(&mut self, clause: impl Into<String>, value: impl ToSql + 'static) {
        self.clauses.push(clause.into());
        self.values.push(Box::new(value));
    }

    /// Adds a clause with no bound value, e.g. `push_raw("error_message IS NULL")`.
    pub fn push_raw(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    /// Adds a clause with several bound values (placeholder count must match).
    pub fn push_many(&mut self, clause: impl Into<String>, values: Vec<Box<dyn ToSql>>) {
        self.clauses.push(clause.into());
        self.values.extend(values);
    }

    /// Renders `WHERE a AND b AND ...`, or an empty string with no clauses.
    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// The bind parameters, in clause order.
    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Escapes `%`/`_` for a LIKE pattern and wraps it in `%...%`.
pub fn contains_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace(['%'], "\\%").replace(['_'], "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn datetime_round_trip_millis() {
        let dt = "2024-08-01T12:30:45.123Z".parse::<DateTime<Utc>>().unwrap();
        let text = format_datetime(&dt);
        assert_eq!(text, "2024-08-01T12:30:45.123Z");
        assert_eq!(parse_datetime(&text), dt);
    }

    #[test]
    fn parses_sqlite_space_format() {
        let dt = parse_datetime("2024-08-01 12:30:45");
        assert_eq!(format_datetime(&dt), "2024-08-01T12:30:45.000Z");
    }

    #[test]
    fn where_renders_and_joins() {
        let mut w = SqlWhere::new();
        assert_eq!(w.sql(), "");
        w.push("status = ?", "pending".to_string());
        w.push("type = ?", "chat".to_string());
        w.push_raw("error_message IS NOT NULL");
        assert_eq!(
            w.sql(),
            "WHERE status = ? AND type = ? AND error_message IS NOT NULL"
        );
        assert_eq!(w.params().len(), 2);
    }

    #[test]
    fn contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }
}
