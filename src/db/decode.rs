//! Fail-closed decoding of stored rows.
//!
//! Any malformed column rejects the whole record with [`AppError::Decode`] instead of falling back
//! to a default value.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Row, Sqlite, Type};

use crate::errors::AppError;

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so text order equals time order.
pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_ids(ids: &[String]) -> Result<String, AppError> {
    serde_json::to_string(ids).map_err(|e| AppError::Internal(format!("Failed to encode id set: {}", e)))
}

/// Column reader bound to one table row, for error context.
pub(crate) struct RowReader<'r> {
    row: &'r SqliteRow,
    table: &'static str,
    id: String,
}

impl<'r> RowReader<'r> {
    pub(crate) fn new(row: &'r SqliteRow, table: &'static str) -> Self {
        let id = row
            .try_get::<String, _>("id")
            .unwrap_or_else(|_| "<unknown>".to_string());
        Self { row, table, id }
    }

    fn fail(&self, column: &str, reason: impl std::fmt::Display) -> AppError {
        AppError::Decode(format!(
            "Invalid {}.{} for record {}: {}",
            self.table, column, self.id, reason
        ))
    }

    pub(crate) fn get<T>(&self, column: &str) -> Result<T, AppError>
    where
        T: for<'q> Decode<'q, Sqlite> + Type<Sqlite>,
    {
        self.row.try_get(column).map_err(|e| self.fail(column, e))
    }

    pub(crate) fn flag(&self, column: &str) -> Result<bool, AppError> {
        match self.get::<i64>(column)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.fail(column, format!("expected 0 or 1, got {}", other))),
        }
    }

    pub(crate) fn time(&self, column: &str) -> Result<DateTime<Utc>, AppError> {
        let raw: String = self.get(column)?;
        parse_time(&raw).map_err(|e| self.fail(column, e))
    }

    pub(crate) fn optional_time(&self, column: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let raw: Option<String> = self.get(column)?;
        raw.map(|r| parse_time(&r).map_err(|e| self.fail(column, e)))
            .transpose()
    }

    pub(crate) fn ids(&self, column: &str) -> Result<Vec<String>, AppError> {
        let raw: String = self.get(column)?;
        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|e| self.fail(column, e))?;
        if ids.iter().any(|id| id.is_empty()) {
            return Err(self.fail(column, "empty user id"));
        }
        Ok(ids)
    }

    /// Parse a text column through `parse`, rejecting unknown labels.
    pub(crate) fn label<T>(&self, column: &str, parse: fn(&str) -> Option<T>) -> Result<T, AppError> {
        let raw: String = self.get(column)?;
        parse(&raw).ok_or_else(|| self.fail(column, format!("unknown value {:?}", raw)))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

/// Decode every row, dropping (and logging) the ones that fail validation.
pub(crate) fn decode_all<T>(
    rows: &[SqliteRow],
    decode: impl Fn(&SqliteRow) -> Result<T, AppError>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Rejected stored record: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_orders_lexicographically() {
        let early = DateTime::parse_from_rfc3339("2025-05-07T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2025-05-07T10:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_time(&early) < format_time(&late));
        assert_eq!(format_time(&early), "2025-05-07T09:00:00.000000Z");
    }

    #[test]
    fn test_now_round_trips_through_storage_format() {
        let t = now();
        assert_eq!(parse_time(&format_time(&t)).unwrap(), t);
    }

    #[test]
    fn test_encode_ids() {
        let ids = vec!["u1".to_string(), "u2".to_string()];
        assert_eq!(encode_ids(&ids).unwrap(), r#"["u1","u2"]"#);
        assert_eq!(encode_ids(&[]).unwrap(), "[]");
    }
}
