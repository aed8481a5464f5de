//! Keyset pagination: opaque cursors, page-size policy and page trimming.
//!
//! A cursor is the standard-base64 encoding of `"<timestamp>|<uuid>"`, where
//! the timestamp is RFC 3339 UTC with nanoseconds. Listings fetch one row more
//! than the page size; the surplus row only signals that another page exists.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{helpers::format_datetime, models::Keyset},
    error::ServiceError,
};

const INVALID_CURSOR: &str = "invalid cursor";

/// Default and maximum page size of one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizePolicy {
    pub default: usize,
    pub max: usize,
}

pub const PROJECTS: PageSizePolicy = PageSizePolicy { default: 20, max: 100 };
pub const LABELS: PageSizePolicy = PageSizePolicy { default: 50, max: 200 };
pub const TASKS: PageSizePolicy = PageSizePolicy { default: 20, max: 100 };

/// Non-positive requests get the default; oversized ones are clamped.
pub fn page_size(first: i64, policy: PageSizePolicy) -> usize {
    if first <= 0 {
        return policy.default;
    }
    usize::try_from(first).map_or(policy.max, |requested| requested.min(policy.max))
}

pub fn encode_cursor(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    STANDARD.encode(format!("{}|{}", format_datetime(created_at), id))
}

pub fn decode_cursor(raw: &str) -> Result<Keyset, ServiceError> {
    let invalid = || ServiceError::bad_input(INVALID_CURSOR);

    let bytes = STANDARD.decode(raw).map_err(|_| invalid())?;
    let decoded = String::from_utf8(bytes).map_err(|_| invalid())?;

    let parts: Vec<&str> = decoded.split('|').collect();
    let [timestamp, id] = parts.as_slice() else {
        return Err(invalid());
    };

    let created_at = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;

    Ok(Keyset { created_at, id })
}

/// Absent or blank `after` starts from the beginning.
pub fn parse_after(after: Option<&str>) -> Result<Option<Keyset>, ServiceError> {
    match after.map(str::trim) {
        Some(raw) if !raw.is_empty() => decode_cursor(raw).map(Some),
        _ => Ok(None),
    }
}

/// One page of a `(created_at, id)`-ordered listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// Trims `rows` (fetched with `limit + 1`) to a page and derives its end cursor.
pub fn paginate<T>(mut rows: Vec<T>, limit: usize, cursor_of: fn(&T) -> String) -> Page<T> {
    let has_next_page = rows.len() > limit;
    rows.truncate(limit);
    let end_cursor = rows.last().map(cursor_of);

    Page {
        items: rows,
        end_cursor,
        has_next_page,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

/// Relay-style view of a page, each edge carrying its own cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    pub fn into_connection(self, cursor_of: fn(&T) -> String) -> Connection<T> {
        let edges = self
            .items
            .into_iter()
            .map(|node| Edge {
                cursor: cursor_of(&node),
                node,
            })
            .collect();

        Connection {
            edges,
            page_info: PageInfo {
                end_cursor: self.end_cursor,
                has_next_page: self.has_next_page,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::{Duration, TimeZone};

    fn keyset(n: i64) -> Keyset {
        Keyset {
            created_at: Utc.with_ymd_and_hms(2026, 2, 17, 10, 0, 0).unwrap() + Duration::seconds(n),
            id: Uuid::new_v4(),
        }
    }

    fn cursor_of(keyset: &Keyset) -> String {
        encode_cursor(&keyset.created_at, &keyset.id)
    }

    #[test]
    fn cursor_round_trips_with_nanoseconds() {
        let created_at = Utc::now();
        let id = Uuid::new_v4();
        let decoded = decode_cursor(&encode_cursor(&created_at, &id)).unwrap();
        assert_eq!(decoded, Keyset { created_at, id });
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        let id = Uuid::new_v4();
        let cases = [
            "***not base64***".to_string(),
            STANDARD.encode("2026-02-17T10:00:00Z"),
            STANDARD.encode(format!("2026-02-17T10:00:00Z|{id}|extra")),
            STANDARD.encode(format!("yesterday|{id}")),
            STANDARD.encode("2026-02-17T10:00:00Z|not-a-uuid"),
        ];

        for raw in cases {
            let err = decode_cursor(&raw).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadUserInput);
            assert_eq!(err.message(), "invalid cursor");
        }
    }

    #[test]
    fn blank_after_means_first_page() {
        assert_eq!(parse_after(None).unwrap(), None);
        assert_eq!(parse_after(Some("  ")).unwrap(), None);
        assert!(parse_after(Some("garbage")).is_err());
    }

    #[test]
    fn page_size_policy() {
        assert_eq!(page_size(0, PROJECTS), 20);
        assert_eq!(page_size(-5, LABELS), 50);
        assert_eq!(page_size(7, TASKS), 7);
        assert_eq!(page_size(500, LABELS), 200);
        assert_eq!(page_size(i64::MAX, TASKS), 100);
    }

    #[test]
    fn surplus_row_sets_has_next_page() {
        let rows: Vec<Keyset> = (0..21).map(keyset).collect();
        let twentieth = cursor_of(&rows[19]);

        let page = paginate(rows, 20, cursor_of);
        assert_eq!(page.items.len(), 20);
        assert!(page.has_next_page);
        assert_eq!(page.end_cursor, Some(twentieth));
    }

    #[test]
    fn exact_page_has_no_next() {
        let rows: Vec<Keyset> = (0..20).map(keyset).collect();
        let page = paginate(rows, 20, cursor_of);
        assert_eq!(page.items.len(), 20);
        assert!(!page.has_next_page);

        let empty = paginate(Vec::<Keyset>::new(), 20, cursor_of);
        assert_eq!(empty.end_cursor, None);
    }

    #[test]
    fn connection_edges_carry_cursors() {
        let rows: Vec<Keyset> = (0..3).map(keyset).collect();
        let expected: Vec<String> = rows.iter().map(cursor_of).collect();

        let connection = paginate(rows, 2, cursor_of).into_connection(cursor_of);
        let cursors: Vec<String> = connection.edges.iter().map(|e| e.cursor.clone()).collect();
        assert_eq!(cursors, expected[..2].to_vec());
        assert_eq!(connection.page_info.end_cursor, Some(expected[1].clone()));
        assert!(connection.page_info.has_next_page);
    }
}
