use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{projects::row_to_delete_result, ListQuery};
use crate::db::{
    helpers::{
        column_datetime, column_optional_datetime, column_optional_uuid, column_uuid,
        format_datetime, format_optional_datetime, invalid_column,
    },
    models::{DeleteResult, Keyset, Task, TaskFilter, TaskPriority, TaskRecord, TaskStatus},
};

const TASK_COLUMNS: &str = "id, user_id, project_id, parent_task_id, title, description, status, \
     priority, start_at, due_at, completed_at, created_at, updated_at, deleted_at";

fn column_enum<T>(row: &Row, column: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    parse(&raw).ok_or_else(|| invalid_column(row, column, anyhow!("unknown {column} '{raw}'")))
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: column_uuid(row, "id")?,
        user_id: column_uuid(row, "user_id")?,
        project_id: column_uuid(row, "project_id")?,
        parent_task_id: column_optional_uuid(row, "parent_task_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: column_enum(row, "status", TaskStatus::from_canonical)?,
        priority: column_enum(row, "priority", TaskPriority::from_canonical)?,
        start_at: column_optional_datetime(row, "start_at")?,
        due_at: column_optional_datetime(row, "due_at")?,
        completed_at: column_optional_datetime(row, "completed_at")?,
        created_at: column_datetime(row, "created_at")?,
        updated_at: column_datetime(row, "updated_at")?,
        deleted_at: column_optional_datetime(row, "deleted_at")?,
    })
}

pub fn insert_task(
    conn: &Connection,
    user_id: Uuid,
    project_id: Uuid,
    parent_task_id: Option<Uuid>,
    record: &TaskRecord,
) -> Result<Task> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "INSERT INTO tasks (id, user_id, project_id, parent_task_id, title, description, status,
                            priority, start_at, due_at, completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         RETURNING {TASK_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            project_id.to_string(),
            parent_task_id.map(|id| id.to_string()),
            record.title,
            record.description,
            record.status.as_str(),
            record.priority.as_str(),
            format_optional_datetime(record.start_at.as_ref()),
            format_optional_datetime(record.due_at.as_ref()),
            format_optional_datetime(record.completed_at.as_ref()),
            now,
        ],
        row_to_task,
    )
    .with_context(|| "failed to insert task")
}

/// Overwrites every mutable column with `record`.
pub fn update_task(conn: &Connection, id: Uuid, user_id: Uuid, record: &TaskRecord) -> Result<Task> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "UPDATE tasks
         SET title = ?3,
             description = ?4,
             status = ?5,
             priority = ?6,
             start_at = ?7,
             due_at = ?8,
             completed_at = ?9,
             updated_at = ?10
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING {TASK_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![
            id.to_string(),
            user_id.to_string(),
            record.title,
            record.description,
            record.status.as_str(),
            record.priority.as_str(),
            format_optional_datetime(record.start_at.as_ref()),
            format_optional_datetime(record.due_at.as_ref()),
            format_optional_datetime(record.completed_at.as_ref()),
            now,
        ],
        row_to_task,
    )
    .with_context(|| format!("failed to update task {id}"))
}

pub fn soft_delete_task(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<DeleteResult> {
    let now = format_datetime(&Utc::now());
    conn.query_row(
        "UPDATE tasks
         SET deleted_at = ?3, updated_at = ?3
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING id, deleted_at",
        params![id.to_string(), user_id.to_string(), now],
        row_to_delete_result,
    )
    .with_context(|| format!("failed to delete task {id}"))
}

/// Soft-deletes every live task of a project, subtasks included.
pub fn soft_delete_tasks_by_project(
    conn: &Connection,
    user_id: Uuid,
    project_id: Uuid,
) -> Result<usize> {
    let now = format_datetime(&Utc::now());
    conn.execute(
        "UPDATE tasks
         SET deleted_at = ?3, updated_at = ?3
         WHERE project_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        params![project_id.to_string(), user_id.to_string(), now],
    )
    .with_context(|| format!("failed to delete tasks of project {project_id}"))
}

pub fn soft_delete_direct_subtasks(
    conn: &Connection,
    user_id: Uuid,
    parent_task_id: Uuid,
) -> Result<usize> {
    let now = format_datetime(&Utc::now());
    conn.execute(
        "UPDATE tasks
         SET deleted_at = ?3, updated_at = ?3
         WHERE parent_task_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        params![parent_task_id.to_string(), user_id.to_string(), now],
    )
    .with_context(|| format!("failed to delete subtasks of task {parent_task_id}"))
}

pub fn get_task(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<Task> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
    );
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_task)
        .with_context(|| format!("failed to load task {id}"))
}

pub fn find_task(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<Option<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
    );
    let task = conn
        .query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_task)
        .optional()?;
    Ok(task)
}

fn filtered(query: ListQuery, filter: &TaskFilter) -> ListQuery {
    query
        .and_in(
            "status",
            filter.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        )
        .and_in(
            "priority",
            filter.priorities.iter().map(|p| p.as_str().to_string()).collect(),
        )
}

/// Top-level tasks of a project.
pub fn list_root_tasks(
    conn: &Connection,
    user_id: Uuid,
    project_id: Uuid,
    filter: &TaskFilter,
    after: Option<&Keyset>,
    limit: usize,
) -> Result<Vec<Task>> {
    let query = ListQuery::new(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL AND parent_task_id IS NULL"
    ))
    .and_eq("user_id", user_id.to_string())
    .and_eq("project_id", project_id.to_string());

    filtered(query, filter)
        .after(after)
        .fetch(conn, limit, row_to_task)
        .with_context(|| format!("failed to list tasks of project {project_id}"))
}

pub fn list_subtasks(
    conn: &Connection,
    user_id: Uuid,
    project_id: Uuid,
    parent_task_id: Uuid,
    filter: &TaskFilter,
    after: Option<&Keyset>,
    limit: usize,
) -> Result<Vec<Task>> {
    let query = ListQuery::new(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL"
    ))
    .and_eq("user_id", user_id.to_string())
    .and_eq("project_id", project_id.to_string())
    .and_eq("parent_task_id", parent_task_id.to_string());

    filtered(query, filter)
        .after(after)
        .fetch(conn, limit, row_to_task)
        .with_context(|| format!("failed to list subtasks of task {parent_task_id}"))
}

/// Every live direct subtask of a parent, unpaginated.
pub fn list_subtasks_by_parent(
    conn: &Connection,
    user_id: Uuid,
    parent_task_id: Uuid,
) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE parent_task_id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(
            params![parent_task_id.to_string(), user_id.to_string()],
            row_to_task,
        )?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load subtasks of task {parent_task_id}"))?;
    Ok(tasks)
}
