//! Battle log repository. Rows are immutable once written.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::instrument;

use crate::errors::Result;
use crate::ids::{BattleLogId, EventId, RunKey};
use crate::sqlite::row_helpers::{get, parse_timestamp};
use crate::types::{BattleLogRecord, format_timestamp};

const TABLE: &str = "battle_logs";

/// Row to insert; `log_data` is already encoded.
pub(crate) struct NewBattleLog<'a> {
    pub id: &'a BattleLogId,
    pub event_id: &'a EventId,
    pub enemy_id: u16,
    pub enemy_name: &'a str,
    pub result: u8,
    pub turns: u8,
    pub timestamp: DateTime<Utc>,
    pub log_data: &'a [u8],
}

/// Battle log repository; stateless, every method takes `&Connection`.
pub(crate) struct BattleLogRepo;

impl BattleLogRepo {
    #[instrument(skip(conn, log), fields(battle_log_id = %log.id, bytes = log.log_data.len()))]
    pub(crate) fn insert(conn: &Connection, run: &RunKey, log: &NewBattleLog<'_>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO battle_logs (id, run_id, event_id, enemy_id, enemy_name, result, turns,
             timestamp, log_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.id.as_str(),
                run.as_str(),
                log.event_id.as_str(),
                log.enemy_id,
                log.enemy_name,
                log.result,
                log.turns,
                format_timestamp(&log.timestamp),
                log.log_data,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn get(conn: &Connection, id: &BattleLogId) -> Result<Option<BattleLogRecord>> {
        conn.query_row(
            "SELECT id, enemy_id, enemy_name, result, turns, timestamp, log_data
             FROM battle_logs WHERE id = ?1",
            params![id.as_str()],
            |row| Ok(map_row(row)),
        )
        .optional()?
        .transpose()
    }

    /// Battle log attached to the highest-sequence event of a run.
    pub(crate) fn latest_for_run(conn: &Connection, run: &RunKey) -> Result<Option<BattleLogRecord>> {
        conn.query_row(
            "SELECT b.id, b.enemy_id, b.enemy_name, b.result, b.turns, b.timestamp, b.log_data
             FROM battle_logs b
             JOIN events e ON e.id = b.event_id
             WHERE b.run_id = ?1
             ORDER BY e.sequence DESC
             LIMIT 1",
            params![run.as_str()],
            |row| Ok(map_row(row)),
        )
        .optional()?
        .transpose()
    }
}

fn map_row(row: &Row<'_>) -> Result<BattleLogRecord> {
    let id: String = get(row, "id", TABLE)?;
    let timestamp: String = get(row, "timestamp", TABLE)?;
    Ok(BattleLogRecord {
        id: BattleLogId::from_raw(id),
        enemy_id: get(row, "enemy_id", TABLE)?,
        enemy_name: get(row, "enemy_name", TABLE)?,
        result: get(row, "result", TABLE)?,
        turns: get(row, "turns", TABLE)?,
        timestamp: parse_timestamp(&timestamp, TABLE, "timestamp")?,
        log_data: get(row, "log_data", TABLE)?,
    })
}
