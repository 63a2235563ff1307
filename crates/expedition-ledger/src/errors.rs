//! Error types for the exploration ledger.
//!
//! [`LedgerError`] is returned by every store, session and worker operation.
//! Codec failures keep their own [`CodecError`] so callers can tell a corrupt
//! battle log apart from a corrupt dropped-item set.

use thiserror::Error;

use crate::codec::CodecError;
use crate::types::RunIdentifier;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Battle log encode/decode failure.
    #[error("battle log codec error: {0}")]
    Codec(#[from] CodecError),

    /// Filesystem error while opening the database.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// The identifier does not resolve to a stored run.
    #[error("run not found: {0}")]
    RunNotFound(RunIdentifier),

    /// The run exists but has already reached a terminal state.
    #[error("run is not running: {0}")]
    RunNotRunning(RunIdentifier),

    /// The party already has a running run.
    #[error("party {party_id} already has a running run started at {started_at}")]
    PartyBusy {
        /// Party that was asked to begin a second run.
        party_id: u8,
        /// Start instant of the run that is still running.
        started_at: chrono::DateTime<chrono::Utc>,
    },

    /// Requested battle log was not found.
    #[error("battle log not found: {0}")]
    BattleLogNotFound(String),

    /// The dropped-item-id blob of a run has an impossible size or shape.
    #[error("corrupted dropped item ids: {0}")]
    CorruptedDroppedItemIds(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// Column that failed to map.
        column: &'static str,
        /// Underlying failure.
        detail: String,
    },

    /// Caller supplied an argument the ledger cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The ledger worker has shut down and can no longer accept commands.
    #[error("ledger worker is closed")]
    WorkerClosed,
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn sqlite_error_display() {
        let err = LedgerError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn run_not_found_display() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let err = LedgerError::RunNotFound(RunIdentifier::new(7, at));
        assert_eq!(
            err.to_string(),
            "run not found: party 7 @ 2026-03-01T09:30:00.000000000Z"
        );
    }

    #[test]
    fn codec_error_converts() {
        let err: LedgerError = CodecError::UnsupportedVersion(9).into();
        assert!(matches!(err, LedgerError::Codec(CodecError::UnsupportedVersion(9))));
    }

    #[test]
    fn corrupted_item_ids_is_distinct_from_codec() {
        let err = LedgerError::CorruptedDroppedItemIds("length 3 is odd".into());
        assert_eq!(err.to_string(), "corrupted dropped item ids: length 3 is odd");
        assert!(!matches!(err, LedgerError::Codec(_)));
    }

    #[test]
    fn corrupt_row_display() {
        let err = LedgerError::CorruptRow {
            table: "runs",
            column: "result",
            detail: "unknown variant: paused".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt row in runs.result: unknown variant: paused"
        );
    }

    #[test]
    fn result_alias() {
        fn example() -> Result<u8> {
            Ok(3)
        }
        assert_eq!(example().unwrap(), 3);
    }
}
