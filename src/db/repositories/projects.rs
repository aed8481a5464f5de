use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::ListQuery;
use crate::db::{
    helpers::{column_datetime, column_optional_datetime, column_uuid, format_datetime},
    models::{DeleteResult, Keyset, NewProject, Project},
};

const PROJECT_COLUMNS: &str =
    "id, user_id, title, description, color, created_at, updated_at, deleted_at";

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: column_uuid(row, "id")?,
        user_id: column_uuid(row, "user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        color: row.get("color")?,
        created_at: column_datetime(row, "created_at")?,
        updated_at: column_datetime(row, "updated_at")?,
        deleted_at: column_optional_datetime(row, "deleted_at")?,
    })
}

pub(crate) fn row_to_delete_result(row: &Row) -> rusqlite::Result<DeleteResult> {
    Ok(DeleteResult {
        id: column_uuid(row, "id")?,
        deleted_at: column_datetime(row, "deleted_at")?,
    })
}

pub fn insert_project(conn: &Connection, user_id: Uuid, project: &NewProject) -> Result<Project> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "INSERT INTO projects (id, user_id, title, description, color, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         RETURNING {PROJECT_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            project.title,
            project.description,
            project.color,
            now,
        ],
        row_to_project,
    )
    .with_context(|| "failed to insert project")
}

/// Full replace of the editable columns. Fails with `QueryReturnedNoRows`
/// when the project is missing, deleted or owned by someone else.
pub fn update_project(
    conn: &Connection,
    id: Uuid,
    user_id: Uuid,
    project: &NewProject,
) -> Result<Project> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "UPDATE projects
         SET title = ?3,
             description = ?4,
             color = ?5,
             updated_at = ?6
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING {PROJECT_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![
            id.to_string(),
            user_id.to_string(),
            project.title,
            project.description,
            project.color,
            now,
        ],
        row_to_project,
    )
    .with_context(|| format!("failed to update project {id}"))
}

pub fn soft_delete_project(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<DeleteResult> {
    let now = format_datetime(&Utc::now());
    conn.query_row(
        "UPDATE projects
         SET deleted_at = ?3, updated_at = ?3
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
         RETURNING id, deleted_at",
        params![id.to_string(), user_id.to_string(), now],
        row_to_delete_result,
    )
    .with_context(|| format!("failed to delete project {id}"))
}

pub fn get_project(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<Project> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
    );
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_project)
        .with_context(|| format!("failed to load project {id}"))
}

pub fn find_project(conn: &Connection, id: Uuid, user_id: Uuid) -> Result<Option<Project>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects
         WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
    );
    let project = conn
        .query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_project)
        .optional()?;
    Ok(project)
}

/// `limit` is the number of rows to fetch, i.e. page size plus one.
pub fn list_projects(
    conn: &Connection,
    user_id: Uuid,
    after: Option<&Keyset>,
    limit: usize,
) -> Result<Vec<Project>> {
    ListQuery::new(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE deleted_at IS NULL"
    ))
    .and_eq("user_id", user_id.to_string())
    .after(after)
    .fetch(conn, limit, row_to_project)
    .with_context(|| "failed to list projects")
}
