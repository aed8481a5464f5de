//! The task/label join. Rows are hard-deleted, never soft-deleted.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::helpers::format_datetime;

pub fn delete_for_task(conn: &Connection, task_id: Uuid) -> Result<usize> {
    conn.execute(
        "DELETE FROM task_labels WHERE task_id = ?1",
        params![task_id.to_string()],
    )
    .with_context(|| format!("failed to clear labels of task {task_id}"))
}

pub fn delete_for_label(conn: &Connection, label_id: Uuid) -> Result<usize> {
    conn.execute(
        "DELETE FROM task_labels WHERE label_id = ?1",
        params![label_id.to_string()],
    )
    .with_context(|| format!("failed to detach label {label_id}"))
}

pub fn insert(conn: &Connection, task_id: Uuid, label_id: Uuid) -> Result<()> {
    conn.execute(
        "INSERT INTO task_labels (task_id, label_id, created_at) VALUES (?1, ?2, ?3)",
        params![
            task_id.to_string(),
            label_id.to_string(),
            format_datetime(&Utc::now())
        ],
    )
    .with_context(|| format!("failed to attach label {label_id} to task {task_id}"))?;
    Ok(())
}
