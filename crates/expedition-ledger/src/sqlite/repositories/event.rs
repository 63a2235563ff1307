//! Event repository: per-run ordered events and their drop lines.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::instrument;

use crate::errors::{LedgerError, Result};
use crate::ids::{BattleLogId, EventId, RunKey};
use crate::sqlite::row_helpers::{get, parse_timestamp, u64_from_sql, u64_to_sql};
use crate::types::{EncounterKind, ExplorationEventRecord, ItemStack, format_timestamp};

const TABLE: &str = "events";

/// Row to insert.
pub(crate) struct NewEvent<'a> {
    pub id: &'a EventId,
    pub sequence: u32,
    pub floor: u16,
    pub kind: EncounterKind,
    pub battle_result: Option<u8>,
    pub exp: u64,
    pub gold: u64,
    pub occurred_at: DateTime<Utc>,
    pub drops: &'a [ItemStack],
}

/// Event repository; stateless, every method takes `&Connection`.
pub(crate) struct EventRepo;

impl EventRepo {
    /// Insert an event and its drops.
    #[instrument(skip(conn, event), fields(event_id = %event.id, sequence = event.sequence))]
    pub(crate) fn insert(conn: &Connection, run: &RunKey, event: &NewEvent<'_>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO events (id, run_id, sequence, floor, kind, subject_id, battle_result,
             exp, gold, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id.as_str(),
                run.as_str(),
                event.sequence,
                event.floor,
                event.kind.tag(),
                event.kind.subject_id(),
                event.battle_result,
                u64_to_sql(event.exp),
                u64_to_sql(event.gold),
                format_timestamp(&event.occurred_at),
            ],
        )?;

        let mut stmt = conn.prepare_cached(
            "INSERT INTO event_drops (event_id, ordinal, item_id, super_rare_title_id,
             normal_title_id, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (ordinal, stack) in event.drops.iter().enumerate() {
            let _ = stmt.execute(params![
                event.id.as_str(),
                ordinal as u32,
                stack.item_id,
                stack.super_rare_title_id,
                stack.normal_title_id,
                stack.quantity,
            ])?;
        }
        Ok(())
    }

    /// All events of a run in sequence order, with drops and battle log ids.
    pub(crate) fn list_for_run(conn: &Connection, run: &RunKey) -> Result<Vec<ExplorationEventRecord>> {
        let mut drops = Self::drops_for_run(conn, run)?;

        let mut stmt = conn.prepare(
            "SELECT e.id, e.sequence, e.floor, e.kind, e.subject_id, e.battle_result,
                    e.exp, e.gold, e.occurred_at, b.id AS battle_log_id
             FROM events e
             LEFT JOIN battle_logs b ON b.event_id = e.id
             WHERE e.run_id = ?1
             ORDER BY e.sequence ASC",
        )?;
        let mut rows = stmt.query(params![run.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = get(row, "id", TABLE)?;
            let tag: String = get(row, "kind", TABLE)?;
            let subject_id: Option<u16> = get(row, "subject_id", TABLE)?;
            let kind = EncounterKind::from_parts(&tag, subject_id).ok_or_else(|| {
                LedgerError::CorruptRow {
                    table: TABLE,
                    column: "kind",
                    detail: format!("{tag} with subject {subject_id:?}"),
                }
            })?;
            let occurred_at: String = get(row, "occurred_at", TABLE)?;
            let battle_log_id: Option<String> = get(row, "battle_log_id", TABLE)?;
            out.push(ExplorationEventRecord {
                sequence: get(row, "sequence", TABLE)?,
                floor: get(row, "floor", TABLE)?,
                kind,
                battle_result: get(row, "battle_result", TABLE)?,
                exp: u64_from_sql(get(row, "exp", TABLE)?),
                gold: u64_from_sql(get(row, "gold", TABLE)?),
                occurred_at: parse_timestamp(&occurred_at, TABLE, "occurred_at")?,
                drops: drops.remove(&id).unwrap_or_default(),
                battle_log_id: battle_log_id.map(BattleLogId::from_raw),
            });
        }
        Ok(out)
    }

    fn drops_for_run(conn: &Connection, run: &RunKey) -> Result<HashMap<String, Vec<ItemStack>>> {
        let mut stmt = conn.prepare(
            "SELECT d.event_id, d.item_id, d.super_rare_title_id, d.normal_title_id, d.quantity
             FROM event_drops d
             JOIN events e ON e.id = d.event_id
             WHERE e.run_id = ?1
             ORDER BY e.sequence ASC, d.ordinal ASC",
        )?;
        let mut rows = stmt.query(params![run.as_str()])?;
        let mut out: HashMap<String, Vec<ItemStack>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let event_id: String = get(row, "event_id", "event_drops")?;
            out.entry(event_id).or_default().push(ItemStack {
                item_id: get(row, "item_id", "event_drops")?,
                super_rare_title_id: get(row, "super_rare_title_id", "event_drops")?,
                normal_title_id: get(row, "normal_title_id", "event_drops")?,
                quantity: get(row, "quantity", "event_drops")?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::database::{ConnectionConfig, Database};
    use crate::sqlite::repositories::run::RunRepo;
    use crate::types::BeginRunParams;
    use chrono::TimeZone;

    fn setup() -> (Database, RunKey) {
        let db = Database::in_memory(&ConnectionConfig::default()).unwrap();
        let key = db
            .with_conn(|c| {
                RunRepo::insert(
                    c,
                    &BeginRunParams {
                        party_id: 1,
                        dungeon_id: 3,
                        difficulty: 0,
                        target_floor: 5,
                        started_at: Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap(),
                        seed: 1,
                    },
                )
            })
            .unwrap();
        (db, key)
    }

    fn stack(item_id: u16, quantity: u32) -> ItemStack {
        ItemStack {
            item_id,
            super_rare_title_id: 0,
            normal_title_id: 1,
            quantity,
        }
    }

    #[test]
    fn events_come_back_in_sequence_with_drops() {
        let (db, key) = setup();
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 0, 1, 0).unwrap();
        let first = EventId::new();
        let second = EventId::new();
        db.with_conn(|c| {
            // Insert out of order to prove ordering comes from `sequence`.
            EventRepo::insert(
                c,
                &key,
                &NewEvent {
                    id: &second,
                    sequence: 1,
                    floor: 2,
                    kind: EncounterKind::Scripted { event_id: 8 },
                    battle_result: None,
                    exp: 0,
                    gold: 0,
                    occurred_at: at,
                    drops: &[stack(30, 1), stack(10, 2)],
                },
            )?;
            EventRepo::insert(
                c,
                &key,
                &NewEvent {
                    id: &first,
                    sequence: 0,
                    floor: 1,
                    kind: EncounterKind::Nothing,
                    battle_result: None,
                    exp: 5,
                    gold: u64::MAX,
                    occurred_at: at,
                    drops: &[],
                },
            )
        })
        .unwrap();

        let events = db.with_conn(|c| EventRepo::list_for_run(c, &key)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EncounterKind::Nothing);
        assert_eq!(events[0].gold, u64::MAX);
        assert!(events[0].drops.is_empty());
        assert_eq!(events[1].kind, EncounterKind::Scripted { event_id: 8 });
        assert_eq!(events[1].drops, vec![stack(30, 1), stack(10, 2)]);
        assert_eq!(events[1].occurred_at, at);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let (db, key) = setup();
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 0, 1, 0).unwrap();
        let result = db.with_conn(|c| {
            for _ in 0..2 {
                EventRepo::insert(
                    c,
                    &key,
                    &NewEvent {
                        id: &EventId::new(),
                        sequence: 0,
                        floor: 1,
                        kind: EncounterKind::Nothing,
                        battle_result: None,
                        exp: 0,
                        gold: 0,
                        occurred_at: at,
                        drops: &[],
                    },
                )?;
            }
            Ok(())
        });
        assert!(matches!(result, Err(LedgerError::Sqlite(_))));
    }
}
