use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, types::ToSql, Connection, Row};
use uuid::Uuid;

use super::{projects::row_to_delete_result, ListQuery};
use crate::db::{
    helpers::{column_datetime, column_optional_datetime, column_uuid, format_datetime},
    models::{DeleteResult, Keyset, Label},
};

const LABEL_COLUMNS: &str = "id, user_id, name, created_at, updated_at, deleted_at";

fn row_to_label(row: &Row) -> rusqlite::Result<Label> {
    Ok(Label {
        id: column_uuid(row, "id")?,
        user_id: column_uuid(row, "user_id")?,
        name: row.get("name")?,
        created_at: column_datetime(row, "created_at")?,
        updated_at: column_datetime(row, "updated_at")?,
        deleted_at: column_optional_datetime(row, "deleted_at")?,
    })
}

/// Create a label. A live label with the same name for the same owner
/// violates `idx_labels_user_name_live`.
pub fn insert_label(conn: &Connection, user_id: Uuid, name: &str) -> Result<Label> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "INSERT INTO labels (id, user_id, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         RETURNING {LABEL_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![Uuid::new_v4().to_string(), user_id.to_string(), name, now],
        row_to_label,
    )
    .with_context(|| "failed to insert label")
}

pub fn update_label(conn: &Connection, id: Uuid, user_id: Uuid, name: &str) -> Result<Label> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "UPDATE labels
         SET name = ?3, updated_at = ?4
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING {LABEL_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![id.to_string(), user_id.to_string(), name, now],
        row_to_label,
    )
    .with_context(|| format!("failed to update label {id}"))
}

pub fn soft_delete_label(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<DeleteResult> {
    let now = format_datetime(&Utc::now());
    conn.query_row(
        "UPDATE labels
         SET deleted_at = ?3, updated_at = ?3
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING id, deleted_at",
        params![id.to_string(), user_id.to_string(), now],
        row_to_delete_result,
    )
    .with_context(|| format!("failed to delete label {id}"))
}

/// Live labels among `ids` that belong to `user_id`. Missing or foreign ids
/// are silently absent, so callers compare counts.
pub fn get_labels_by_ids(conn: &Connection, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<Label>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {LABEL_COLUMNS} FROM labels
         WHERE user_id = ? AND deleted_at IS NULL AND id IN ({placeholders})"
    );

    let mut params_vec: Vec<String> = Vec::with_capacity(ids.len() + 1);
    params_vec.push(user_id.to_string());
    params_vec.extend(ids.iter().map(Uuid::to_string));
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p as &dyn ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let labels = stmt
        .query_map(params_refs.as_slice(), row_to_label)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| "failed to load labels by id")?;
    Ok(labels)
}

pub fn list_labels(
    conn: &Connection,
    user_id: Uuid,
    after: Option<&Keyset>,
    limit: usize,
) -> Result<Vec<Label>> {
    ListQuery::new(&format!(
        "SELECT {LABEL_COLUMNS} FROM labels WHERE deleted_at IS NULL"
    ))
    .and_eq("user_id", user_id.to_string())
    .after(after)
    .fetch(conn, limit, row_to_label)
    .with_context(|| "failed to list labels")
}

/// Live labels attached to a task, oldest first.
pub fn list_labels_for_task(conn: &Connection, user_id: Uuid, task_id: Uuid) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id AS id, l.user_id AS user_id, l.name AS name,
                l.created_at AS created_at, l.updated_at AS updated_at, l.deleted_at AS deleted_at
         FROM labels l
         JOIN task_labels tl ON tl.label_id = l.id
         WHERE tl.task_id = ?1 AND l.user_id = ?2 AND l.deleted_at IS NULL
         ORDER BY l.created_at ASC, l.id ASC",
    )?;

    let labels = stmt
        .query_map(params![task_id.to_string(), user_id.to_string()], row_to_label)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load labels for task {task_id}"))?;
    Ok(labels)
}
