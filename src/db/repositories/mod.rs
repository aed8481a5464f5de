//! Storage gateway: one module per table, every statement scoped by owner.
//!
//! Functions take a plain `&Connection` so they compose inside a
//! `Database::with_tx` body (a `Transaction` derefs to a `Connection`) as well
//! as in a bare `Database::execute` call.

pub mod labels;
pub mod projects;
pub mod task_labels;
pub mod tasks;
pub mod users;

use anyhow::{Context, Result};
use rusqlite::{types::ToSql, Connection, Row};

use crate::db::{helpers::format_datetime, models::Keyset};

/// `SELECT` for a keyset-paginated listing, built up one predicate at a time.
///
/// Rows always come back ordered by `(created_at, id)` ascending.
pub(crate) struct ListQuery {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

impl ListQuery {
    /// `select` must end in a `WHERE` clause so predicates can be appended with `AND`.
    pub fn new(select: &str) -> Self {
        Self {
            sql: select.to_string(),
            params: Vec::new(),
        }
    }

    pub fn and_eq(mut self, column: &str, value: impl ToSql + 'static) -> Self {
        self.sql.push_str(&format!(" AND {column} = ?"));
        self.params.push(Box::new(value));
        self
    }

    /// No-op for an empty set.
    pub fn and_in(mut self, column: &str, values: Vec<String>) -> Self {
        if values.is_empty() {
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.sql.push_str(&format!(" AND {column} IN ({placeholders})"));
        for value in values {
            self.params.push(Box::new(value));
        }
        self
    }

    pub fn after(mut self, keyset: Option<&Keyset>) -> Self {
        if let Some(keyset) = keyset {
            let created_at = format_datetime(&keyset.created_at);
            self.sql
                .push_str(" AND (created_at > ? OR (created_at = ? AND id > ?))");
            self.params.push(Box::new(created_at.clone()));
            self.params.push(Box::new(created_at));
            self.params.push(Box::new(keyset.id.to_string()));
        }
        self
    }

    pub fn fetch<T>(
        mut self,
        conn: &Connection,
        limit: usize,
        map_row: fn(&Row) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        self.sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT ?");
        self.params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));

        let params_refs: Vec<&dyn ToSql> = self.params.iter().map(|b| b.as_ref()).collect();

        let mut stmt = conn
            .prepare(&self.sql)
            .with_context(|| "failed to prepare listing query")?;
        let rows = stmt
            .query_map(params_refs.as_slice(), map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
