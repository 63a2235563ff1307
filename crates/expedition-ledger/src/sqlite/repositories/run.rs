//! Run repository: run rows and their checkpoint/total columns.
//!
//! Runs are addressed externally by `(party_id, started_at)`; the surrogate
//! [`RunKey`] is what child tables reference.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::instrument;

use crate::codec::encode_item_ids;
use crate::errors::Result;
use crate::ids::RunKey;
use crate::sqlite::row_helpers::{
    get, parse_date, parse_enum, parse_item_ids, parse_timestamp, u64_from_sql, u64_to_sql,
};
use crate::types::{
    BeginRunParams, ExplorationRunRecord, RunIdentifier, RunResult, SuperRareState,
    format_timestamp,
};

const TABLE: &str = "runs";

const COLUMNS: &str = "id, party_id, started_at, dungeon_id, difficulty, target_floor, seed,
     random_state, result, ended_at, final_floor, total_exp, total_gold, auto_sell_gold,
     super_rare_jst_date, super_rare_has_triggered, dropped_item_ids, event_count";

/// A run row together with its surrogate key.
#[derive(Clone, Debug)]
pub(crate) struct StoredRun {
    pub key: RunKey,
    pub record: ExplorationRunRecord,
}

/// Run repository; stateless, every method takes `&Connection`.
pub(crate) struct RunRepo;

impl RunRepo {
    /// Insert a fresh running run.
    #[instrument(skip(conn), fields(party_id = params.party_id))]
    pub(crate) fn insert(conn: &Connection, params: &BeginRunParams) -> Result<RunKey> {
        let key = RunKey::new();
        let _ = conn.execute(
            "INSERT INTO runs (id, party_id, started_at, dungeon_id, difficulty, target_floor,
             seed, random_state, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 'running')",
            params![
                key.as_str(),
                params.party_id,
                format_timestamp(&params.started_at),
                params.dungeon_id,
                params.difficulty,
                params.target_floor,
                u64_to_sql(params.seed),
            ],
        )?;
        Ok(key)
    }

    /// Look up a run by its natural key.
    pub(crate) fn find(conn: &Connection, id: &RunIdentifier) -> Result<Option<StoredRun>> {
        let sql = format!("SELECT {COLUMNS} FROM runs WHERE party_id = ?1 AND started_at = ?2");
        conn.query_row(
            &sql,
            params![id.party_id, format_timestamp(&id.started_at)],
            |row| Ok(map_row(row)),
        )
        .optional()?
        .transpose()
    }

    /// The running run of a party, if any.
    pub(crate) fn running_for_party(conn: &Connection, party_id: u8) -> Result<Option<StoredRun>> {
        let sql = format!("SELECT {COLUMNS} FROM runs WHERE party_id = ?1 AND result = 'running'");
        conn.query_row(&sql, params![party_id], |row| Ok(map_row(row)))
            .optional()?
            .transpose()
    }

    /// Most recent runs of one party, newest first.
    pub(crate) fn list_recent(conn: &Connection, party_id: u8, limit: u32) -> Result<Vec<StoredRun>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM runs WHERE party_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2"
        );
        collect(conn, &sql, params![party_id, limit])
    }

    /// Up to `limit_per_party` most recent runs of every party, grouped by
    /// party ascending and newest first within a party.
    pub(crate) fn list_recent_per_party(
        conn: &Connection,
        limit_per_party: u32,
    ) -> Result<Vec<StoredRun>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM (
               SELECT *, ROW_NUMBER() OVER (
                 PARTITION BY party_id ORDER BY started_at DESC, id DESC
               ) AS rn
               FROM runs
             )
             WHERE rn <= ?1
             ORDER BY party_id ASC, started_at DESC, id DESC"
        );
        collect(conn, &sql, params![limit_per_party])
    }

    /// Every running run, oldest first.
    pub(crate) fn list_running(conn: &Connection) -> Result<Vec<RunIdentifier>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM runs WHERE result = 'running' ORDER BY started_at ASC, id ASC"
        );
        Ok(collect(conn, &sql, [])?
            .into_iter()
            .map(|run| run.record.id)
            .collect())
    }

    /// Write back every mutable column of a run.
    #[instrument(skip(conn, record), fields(run = %record.id, result = %record.result))]
    pub(crate) fn update(conn: &Connection, key: &RunKey, record: &ExplorationRunRecord) -> Result<()> {
        let item_ids = encode_item_ids(&record.dropped_item_ids)?;
        let _ = conn.execute(
            "UPDATE runs SET
               random_state = ?2, result = ?3, ended_at = ?4, final_floor = ?5,
               total_exp = ?6, total_gold = ?7, auto_sell_gold = ?8,
               super_rare_jst_date = ?9, super_rare_has_triggered = ?10,
               dropped_item_ids = ?11, event_count = ?12
             WHERE id = ?1",
            params![
                key.as_str(),
                u64_to_sql(record.random_state),
                record.result.to_string(),
                record.ended_at.as_ref().map(format_timestamp),
                record.final_floor,
                u64_to_sql(record.total_exp),
                u64_to_sql(record.total_gold),
                u64_to_sql(record.auto_sell_gold),
                record
                    .super_rare
                    .jst_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                record.super_rare.has_triggered,
                item_ids,
                record.event_count,
            ],
        )?;
        Ok(())
    }

    /// Total number of runs.
    pub(crate) fn count(conn: &Connection) -> Result<u32> {
        Ok(conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?)
    }

    /// Delete up to `limit` of the oldest non-running runs. Child rows go by
    /// cascade. Returns the number deleted.
    #[instrument(skip(conn))]
    pub(crate) fn delete_oldest_finished(conn: &Connection, limit: u32) -> Result<u32> {
        let deleted = conn.execute(
            "DELETE FROM runs WHERE id IN (
               SELECT id FROM runs WHERE result != 'running'
               ORDER BY started_at ASC, id ASC LIMIT ?1
             )",
            params![limit],
        )?;
        Ok(deleted as u32)
    }
}

fn collect<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<StoredRun>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| Ok(map_row(row)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn map_row(row: &Row<'_>) -> Result<StoredRun> {
    let key: String = get(row, "id", TABLE)?;
    let started_at: String = get(row, "started_at", TABLE)?;
    let result: String = get(row, "result", TABLE)?;
    let ended_at: Option<String> = get(row, "ended_at", TABLE)?;
    let jst_date: Option<String> = get(row, "super_rare_jst_date", TABLE)?;
    let item_ids: Option<Vec<u8>> = get(row, "dropped_item_ids", TABLE)?;

    let record = ExplorationRunRecord {
        id: RunIdentifier::new(
            get(row, "party_id", TABLE)?,
            parse_timestamp(&started_at, TABLE, "started_at")?,
        ),
        dungeon_id: get(row, "dungeon_id", TABLE)?,
        difficulty: get(row, "difficulty", TABLE)?,
        target_floor: get(row, "target_floor", TABLE)?,
        seed: u64_from_sql(get(row, "seed", TABLE)?),
        random_state: u64_from_sql(get(row, "random_state", TABLE)?),
        result: parse_enum::<RunResult>(&result, TABLE, "result")?,
        ended_at: ended_at
            .map(|raw| parse_timestamp(&raw, TABLE, "ended_at"))
            .transpose()?,
        final_floor: get(row, "final_floor", TABLE)?,
        total_exp: u64_from_sql(get(row, "total_exp", TABLE)?),
        total_gold: u64_from_sql(get(row, "total_gold", TABLE)?),
        auto_sell_gold: u64_from_sql(get(row, "auto_sell_gold", TABLE)?),
        super_rare: SuperRareState {
            jst_date: jst_date
                .map(|raw| parse_date(&raw, TABLE, "super_rare_jst_date"))
                .transpose()?,
            has_triggered: get(row, "super_rare_has_triggered", TABLE)?,
        },
        dropped_item_ids: parse_item_ids(item_ids.as_deref())?,
        event_count: get(row, "event_count", TABLE)?,
    };
    Ok(StoredRun {
        key: RunKey::from_raw(key),
        record,
    })
}
