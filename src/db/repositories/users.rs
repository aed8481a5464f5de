use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{column_datetime, column_uuid, format_datetime},
    models::{Owner, OwnerProfile},
};

const USER_COLUMNS: &str = "id, name, email, timezone, avatar_url, created_at, updated_at";

fn row_to_owner(row: &Row) -> rusqlite::Result<Owner> {
    Ok(Owner {
        id: column_uuid(row, "id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        timezone: row.get("timezone")?,
        avatar_url: row.get("avatar_url")?,
        created_at: column_datetime(row, "created_at")?,
        updated_at: column_datetime(row, "updated_at")?,
    })
}

/// Insert the owner, or refresh its profile when the email already exists.
/// The id and `created_at` of an existing row never change.
pub fn upsert_user_by_email(conn: &Connection, profile: &OwnerProfile) -> Result<Owner> {
    let now = format_datetime(&Utc::now());
    let sql = format!(
        "INSERT INTO users (id, name, email, timezone, avatar_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(email) DO UPDATE SET
             name = excluded.name,
             timezone = excluded.timezone,
             avatar_url = excluded.avatar_url,
             updated_at = excluded.updated_at
         RETURNING {USER_COLUMNS}"
    );

    conn.query_row(
        &sql,
        params![
            Uuid::new_v4().to_string(),
            profile.name,
            profile.email,
            profile.timezone,
            profile.avatar_url,
            now,
        ],
        row_to_owner,
    )
    .with_context(|| "failed to upsert user")
}

pub fn get_user_by_id(conn: &Connection, id: Uuid) -> Result<Owner> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], row_to_owner)
        .with_context(|| format!("failed to load user {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;

    fn profile(name: &str, email: &str) -> OwnerProfile {
        OwnerProfile {
            name: name.into(),
            email: email.into(),
            timezone: "UTC".into(),
            avatar_url: None,
        }
    }

    #[test]
    fn upsert_keeps_identity_and_refreshes_profile() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let first = upsert_user_by_email(&conn, &profile("Ada", "ada@example.com")).unwrap();
        let second = upsert_user_by_email(&conn, &profile("Ada L.", "ADA@example.com")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.name, "Ada L.");

        let found = get_user_by_id(&conn, first.id).unwrap();
        assert_eq!(found.email, "ada@example.com");
        assert!(get_user_by_id(&conn, Uuid::new_v4()).is_err());
    }
}
