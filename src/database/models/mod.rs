pub mod activity;
pub mod event;
pub mod setting;
pub mod transaction;
pub mod user;

pub use activity::*;
pub use event::*;
pub use setting::*;
pub use transaction::*;
pub use user::*;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical comparison in SQL matches chronological order.
pub fn timestamp_to_sql(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_error<E>(column: &str, source: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.trim().parse().map_err(|e| decode_error(column, e))
}

pub(crate) fn utc_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| decode_error(column, e))
}

pub(crate) fn optional_utc_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| decode_error(column, e))
    })
    .transpose()
}

pub(crate) fn optional_offset_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<FixedOffset>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| DateTime::parse_from_rfc3339(&value).map_err(|e| decode_error(column, e)))
        .transpose()
}

pub(crate) fn invalid_value(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{value}'").into(),
    }
}
