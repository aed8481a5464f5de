//! Input normalization. Everything here runs before any storage call and
//! fails with `BadUserInput` only.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::{
    db::models::{TaskFilter, TaskPriority, TaskStatus},
    error::ServiceError,
};

type Validated<T> = Result<T, ServiceError>;

/// Trimmed value, or `message` when nothing is left.
pub fn required(value: &str, message: &str) -> Validated<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::bad_input(message));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_email(value: &str) -> Validated<String> {
    required(&value.to_lowercase(), "email is required")
}

/// `None` means "no color". Anything supplied must be `#RRGGBB` and comes
/// back upper-cased.
pub fn normalize_color(color: Option<String>) -> Validated<Option<String>> {
    let Some(raw) = color else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::bad_input(
            "color cannot be empty; omit it or use #RRGGBB",
        ));
    }

    let hex = trimmed.strip_prefix('#').unwrap_or_default();
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ServiceError::bad_input("color must be in #RRGGBB format"));
    }

    Ok(Some(trimmed.to_ascii_uppercase()))
}

pub fn normalize_status(value: &str) -> Validated<TaskStatus> {
    let canonical = value.trim().to_uppercase();
    if canonical.is_empty() {
        return Ok(TaskStatus::default());
    }
    TaskStatus::from_canonical(&canonical)
        .ok_or_else(|| ServiceError::bad_input(format!("invalid status {canonical:?}")))
}

pub fn normalize_priority(value: &str) -> Validated<TaskPriority> {
    let canonical = value.trim().to_uppercase();
    if canonical.is_empty() {
        return Ok(TaskPriority::default());
    }
    TaskPriority::from_canonical(&canonical)
        .ok_or_else(|| ServiceError::bad_input(format!("invalid priority {canonical:?}")))
}

/// Maps every element, dropping repeats while keeping first-seen order.
fn dedup_map<T, F>(input: &[String], mut normalize: F) -> Validated<Vec<T>>
where
    T: Copy + Eq + Hash,
    F: FnMut(&str) -> Validated<T>,
{
    let mut seen = HashSet::with_capacity(input.len());
    let mut out = Vec::with_capacity(input.len());
    for raw in input {
        let value = normalize(raw)?;
        if seen.insert(value) {
            out.push(value);
        }
    }
    Ok(out)
}

/// Status and priority filters for task listings.
pub fn normalize_filters(statuses: &[String], priorities: &[String]) -> Validated<TaskFilter> {
    Ok(TaskFilter {
        statuses: dedup_map(statuses, normalize_status)?,
        priorities: dedup_map(priorities, normalize_priority)?,
    })
}

pub fn parse_id(input: &str, field: &str) -> Validated<Uuid> {
    Uuid::parse_str(input.trim())
        .map_err(|_| ServiceError::bad_input(format!("{field} must be a valid UUID")))
}

/// Absent or blank input means "no id".
pub fn parse_optional_id(input: Option<&str>, field: &str) -> Validated<Option<Uuid>> {
    match input {
        Some(raw) if !raw.trim().is_empty() => parse_id(raw, field).map(Some),
        _ => Ok(None),
    }
}

pub fn parse_id_list(ids: &[String], field: &str) -> Validated<Vec<Uuid>> {
    dedup_map(ids, |raw| parse_id(raw, field))
}

/// Stored timestamps only keep text order within four-digit years.
fn storable(value: Option<&DateTime<Utc>>, field: &str) -> Validated<()> {
    match value {
        Some(value) if !(0..=9999).contains(&value.year()) => Err(ServiceError::bad_input(
            format!("{field} must be between years 0000 and 9999"),
        )),
        _ => Ok(()),
    }
}

pub fn validate_schedule(
    start_at: Option<&DateTime<Utc>>,
    due_at: Option<&DateTime<Utc>>,
) -> Validated<()> {
    storable(start_at, "startAt")?;
    storable(due_at, "dueAt")?;

    match (start_at, due_at) {
        (Some(start), Some(due)) if due < start => Err(ServiceError::bad_input(
            "dueAt must be after or equal to startAt",
        )),
        _ => Ok(()),
    }
}
