use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};

use crate::codec::decode_item_ids;
use crate::errors::{LedgerError, Result};

/// Read a required column, mapping failures to [`LedgerError::CorruptRow`].
pub(crate) fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    column: &'static str,
    table: &'static str,
) -> Result<T> {
    row.get(column).map_err(|e| LedgerError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a text column into an enum.
pub(crate) fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T> {
    raw.parse().map_err(|_| LedgerError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

pub(crate) fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LedgerError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

pub(crate) fn parse_date(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| LedgerError::CorruptRow {
        table,
        column,
        detail: format!("invalid date {raw:?}: {e}"),
    })
}

/// Dropped-item-id blob; NULL and empty both mean the empty set.
pub(crate) fn parse_item_ids(raw: Option<&[u8]>) -> Result<BTreeSet<u16>> {
    decode_item_ids(raw.unwrap_or_default())
        .map_err(|e| LedgerError::CorruptedDroppedItemIds(e.to_string()))
}

/// SQLite integers are signed; u64 counters are stored bit-for-bit.
pub(crate) fn u64_to_sql(v: u64) -> i64 {
    v as i64
}

pub(crate) fn u64_from_sql(v: i64) -> u64 {
    v as u64
}
