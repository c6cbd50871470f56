// In crates/database/src/row.rs

use crate::{Error, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

pub(crate) fn decimal(row: &SqliteRow, column: &'static str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|e| Error::Corrupt {
        column,
        reason: format!("{:?}: {}", text, e),
    })
}

pub(crate) fn opt_decimal(row: &SqliteRow, column: &'static str) -> Result<Option<Decimal>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| {
        Decimal::from_str(&t).map_err(|e| Error::Corrupt {
            column,
            reason: format!("{:?}: {}", t, e),
        })
    })
    .transpose()
}

/// Parses a TEXT column into any domain enum with a `FromStr` impl.
pub(crate) fn parsed<T>(row: &SqliteRow, column: &'static str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let text: String = row.try_get(column)?;
    text.parse().map_err(|e: T::Err| Error::Corrupt {
        column,
        reason: e.to_string(),
    })
}

/// Non-negative INTEGER columns (leverage, counts, iterations).
pub(crate) fn unsigned<T: TryFrom<i64>>(row: &SqliteRow, column: &'static str) -> Result<T> {
    let value: i64 = row.try_get(column)?;
    T::try_from(value).map_err(|_| Error::Corrupt {
        column,
        reason: format!("{} is out of range", value),
    })
}
