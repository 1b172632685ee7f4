//! Best-effort row decoding for list queries.
//!
//! One undecodable historical row must not hide the rest of a list. Rows
//! whose columns fail to convert are logged and skipped; errors raised while
//! stepping the statement itself still abort the read.

use tracing::warn;

use crate::error::StoreResult;

/// Whether `err` came from converting a column value rather than from SQLite.
fn is_decode_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::Utf8Error(_)
    )
}

/// Collect mapped rows, skipping (and logging) the ones that fail to decode.
pub(crate) fn collect_best_effort<T>(
    entity: &'static str,
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        match row {
            Ok(value) => out.push(value),
            Err(err) if is_decode_error(&err) => {
                skipped += 1;
                warn!(entity, error = %err, "skipping undecodable row");
            }
            Err(err) => return Err(err.into()),
        }
    }
    if skipped > 0 {
        warn!(entity, skipped, kept = out.len(), "list returned with rows skipped");
    }
    Ok(out)
}

/// Build the conversion error used when a column holds an out-of-domain value.
pub(crate) fn conversion_error(column: usize, message: impl Into<String>) -> rusqlite::Error {
    let message: String = message.into();
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Integer, message.into())
}
