use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Row};
use uuid::Uuid;

/// Storage form of a timestamp: fixed-width RFC 3339 UTC with nanoseconds.
///
/// Fixed width keeps SQL text comparison identical to chronological order,
/// which the keyset predicates rely on. That only holds for years 0000 to
/// 9999; callers reject anything outside before it reaches storage.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_uuid(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn invalid_column(row: &Row, column: &str, err: anyhow::Error) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
}

pub fn column_datetime(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_datetime(&raw, column).map_err(|err| invalid_column(row, column, err))
}

pub fn column_optional_datetime(
    row: &Row,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    parse_optional_datetime(raw, column).map_err(|err| invalid_column(row, column, err))
}

pub fn column_uuid(row: &Row, column: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    parse_uuid(&raw, column).map_err(|err| invalid_column(row, column, err))
}

pub fn column_optional_uuid(row: &Row, column: &str) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| parse_uuid(&value, column))
        .transpose()
        .map_err(|err| invalid_column(row, column, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_like_time() {
        let early = Utc.with_ymd_and_hms(2026, 2, 17, 10, 0, 0).unwrap();
        let later = early + chrono::Duration::nanoseconds(1);
        let much_later = early + chrono::Duration::hours(30);

        let mut formatted = vec![
            format_datetime(&much_later),
            format_datetime(&later),
            format_datetime(&early),
        ];
        formatted.sort();

        assert_eq!(
            formatted,
            vec![
                format_datetime(&early),
                format_datetime(&later),
                format_datetime(&much_later)
            ]
        );
        assert_eq!(format_datetime(&early), "2026-02-17T10:00:00.000000000Z");
    }

    #[test]
    fn parse_round_trips_formatted_value() {
        let now = Utc::now();
        assert_eq!(parse_datetime(&format_datetime(&now), "created_at").unwrap(), now);
        assert!(parse_datetime("yesterday", "created_at").is_err());
    }
}
