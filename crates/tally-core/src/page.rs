//! Cursor-paged result container.

use serde::{Deserialize, Serialize};

/// Hard cap on any single page, regardless of the requested limit.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back to fetch the next page; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Total rows matching the filter (cursor excluded).
    pub total: i64,
}

/// Clamps a requested limit to `[1, MAX_PAGE_SIZE]`.
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limits() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(5000)), MAX_PAGE_SIZE);
    }
}
