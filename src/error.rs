//! Domain error taxonomy.
//!
//! Every caller-facing operation fails with a [`ServiceError`]. Validation
//! failures are built directly; storage failures go through [`classify`]
//! exactly once, which is the only place that inspects SQLite error codes.

use log::error;
use rusqlite::ffi;
use serde::Serialize;
use thiserror::Error;

/// Stable, transport-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadUserInput,
    NotFound,
    Conflict,
    Internal,
}

/// Failure of a caller-facing operation.
///
/// `Display` only ever renders the code and the human-readable message. The
/// wrapped cause stays reachable through `source()` for diagnostics.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("BAD_USER_INPUT: {0}")]
    BadUserInput(String),

    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    #[error("CONFLICT: {message}")]
    Conflict {
        message: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("INTERNAL: {message}")]
    Internal {
        message: String,
        #[source]
        cause: anyhow::Error,
    },
}

impl ServiceError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        ServiceError::BadUserInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>, cause: anyhow::Error) -> Self {
        ServiceError::Conflict {
            message: message.into(),
            cause,
        }
    }

    pub fn internal(message: impl Into<String>, cause: anyhow::Error) -> Self {
        ServiceError::Internal {
            message: message.into(),
            cause,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::BadUserInput(_) => ErrorCode::BadUserInput,
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::Conflict { .. } => ErrorCode::Conflict,
            ServiceError::Internal { .. } => ErrorCode::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::BadUserInput(message) | ServiceError::NotFound(message) => message,
            ServiceError::Conflict { message, .. } | ServiceError::Internal { message, .. } => {
                message
            }
        }
    }

    /// Payload safe to hand to a client: kind and message, never the cause.
    pub fn to_client(&self) -> ClientError {
        ClientError {
            code: self.code(),
            message: self.message().to_string(),
        }
    }
}

/// Serializable view of a [`ServiceError`] for transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientError {
    pub code: ErrorCode,
    pub message: String,
}

/// Coarse shape of a storage failure, as far as the taxonomy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageFailure {
    NoRows,
    UniqueViolation,
    ConstraintViolation,
    Other,
}

fn storage_failure(err: &anyhow::Error) -> StorageFailure {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::QueryReturnedNoRows) => StorageFailure::NoRows,
        Some(rusqlite::Error::SqliteFailure(failure, _)) => match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                StorageFailure::UniqueViolation
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY | ffi::SQLITE_CONSTRAINT_CHECK => {
                StorageFailure::ConstraintViolation
            }
            _ => StorageFailure::Other,
        },
        _ => StorageFailure::Other,
    }
}

/// Translates a storage failure into the domain taxonomy.
///
/// A `ServiceError` that already travelled through the storage layer (for
/// example one raised inside a transaction body) is returned untouched, so no
/// failure is ever classified twice.
pub fn classify(err: anyhow::Error, fallback: &str) -> ServiceError {
    let err = match err.downcast::<ServiceError>() {
        Ok(domain) => return domain,
        Err(err) => err,
    };

    match storage_failure(&err) {
        StorageFailure::NoRows => ServiceError::not_found(fallback),
        StorageFailure::UniqueViolation => ServiceError::conflict("resource already exists", err),
        StorageFailure::ConstraintViolation => {
            ServiceError::bad_input("request violates data constraints")
        }
        StorageFailure::Other => {
            error!("{fallback}: {err:#}");
            ServiceError::internal(fallback, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use rusqlite::Connection;

    fn scratch() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parents (id TEXT PRIMARY KEY);
             CREATE TABLE children (
                 id TEXT PRIMARY KEY,
                 parent_id TEXT NOT NULL REFERENCES parents(id),
                 size INTEGER NOT NULL CHECK (size > 0)
             );
             INSERT INTO parents (id) VALUES ('p1');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn no_rows_becomes_not_found_with_fallback() {
        let conn = scratch();
        let err = conn
            .query_row("SELECT id FROM parents WHERE id = 'nope'", [], |row| {
                row.get::<_, String>(0)
            })
            .context("lookup failed")
            .unwrap_err();

        let classified = classify(err, "project not found");
        assert_eq!(classified.code(), ErrorCode::NotFound);
        assert_eq!(classified.message(), "project not found");
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let conn = scratch();
        let err = conn
            .execute("INSERT INTO parents (id) VALUES ('p1')", [])
            .map_err(anyhow::Error::from)
            .unwrap_err();

        let classified = classify(err, "failed to create");
        assert_eq!(classified.code(), ErrorCode::Conflict);
        assert_eq!(classified.message(), "resource already exists");
        assert!(std::error::Error::source(&classified).is_some());
    }

    #[test]
    fn foreign_key_and_check_become_bad_input() {
        let conn = scratch();
        let fk = conn
            .execute(
                "INSERT INTO children (id, parent_id, size) VALUES ('c1', 'missing', 1)",
                [],
            )
            .map_err(anyhow::Error::from)
            .unwrap_err();
        let check = conn
            .execute(
                "INSERT INTO children (id, parent_id, size) VALUES ('c2', 'p1', 0)",
                [],
            )
            .map_err(anyhow::Error::from)
            .unwrap_err();

        for err in [fk, check] {
            let classified = classify(err, "failed");
            assert_eq!(classified.code(), ErrorCode::BadUserInput);
            assert_eq!(classified.message(), "request violates data constraints");
        }
    }

    #[test]
    fn anything_else_is_internal_and_hides_cause() {
        let classified = classify(anyhow::anyhow!("disk on fire"), "failed to list tasks");
        assert_eq!(classified.code(), ErrorCode::Internal);

        let client = classified.to_client();
        assert_eq!(client.message, "failed to list tasks");
        assert!(!classified.to_string().contains("disk on fire"));
    }

    #[test]
    fn domain_errors_pass_through_untouched() {
        let err: anyhow::Error = ServiceError::bad_input("only one level of subtasks is supported").into();
        let classified = classify(err, "failed to create task");
        assert_eq!(classified.code(), ErrorCode::BadUserInput);
        assert_eq!(classified.message(), "only one level of subtasks is supported");
    }

    #[test]
    fn client_error_serializes_wire_code() {
        let json = serde_json::to_value(ServiceError::not_found("task not found").to_client()).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "task not found");
    }
}
