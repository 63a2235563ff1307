//! Bounded run history.
//!
//! The table is kept at or below [`RetentionPolicy::capacity`] by deleting the
//! oldest finished runs. A running run is never deleted, so the table may
//! exceed capacity when every surplus row is still running.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::sqlite::repositories::RunRepo;

/// Default number of runs kept.
pub const DEFAULT_CAPACITY: u32 = 200;

/// How many runs the ledger keeps and when it trims.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionPolicy {
    /// Maximum number of stored runs.
    pub capacity: u32,
    /// Make room inside `begin_run` so inserts never push the table past
    /// capacity.
    pub purge_on_begin: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            purge_on_begin: true,
        }
    }
}

/// Outcome of one purge pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    /// Runs deleted (with their events, logs, drops and auto-sell rows).
    pub deleted: u32,
    /// Runs left afterwards.
    pub remaining: u32,
}

/// Delete enough of the oldest finished runs that `incoming` new runs fit
/// under `capacity`: `count + incoming - capacity` of them, ordered by start
/// time (surrogate key breaks ties).
///
/// With `incoming = 1` this is the foreground purge: when `count >= capacity`
/// it deletes `count - capacity + 1` runs.
pub(crate) fn make_room(conn: &Connection, capacity: u32, incoming: u32) -> Result<PurgeReport> {
    let count = RunRepo::count(conn)?;
    let excess = count.saturating_add(incoming).saturating_sub(capacity);
    if excess == 0 {
        debug!(count, capacity, "retention: under capacity");
        return Ok(PurgeReport {
            deleted: 0,
            remaining: count,
        });
    }

    let deleted = RunRepo::delete_oldest_finished(conn, excess)?;
    if deleted < excess {
        warn!(
            count,
            capacity,
            wanted = excess,
            deleted,
            "retention: not enough finished runs to delete"
        );
    } else {
        info!(count, capacity, deleted, "retention: purged oldest runs");
    }
    Ok(PurgeReport {
        deleted,
        remaining: count - deleted,
    })
}
