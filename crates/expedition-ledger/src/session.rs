//! Batched writes against one run.
//!
//! An [`EventSession`] queues appends and terminal transitions in memory and
//! applies them in a single transaction when [`EventSession::flush_if_needed`]
//! consumes it. Nothing touches storage before the flush, and a session with
//! nothing queued flushes without any I/O.
//!
//! Battle logs are encoded when queued, so a log that cannot be encoded is
//! rejected immediately instead of failing the whole flush later.

use std::collections::BTreeSet;
use std::mem;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::errors::{LedgerError, Result};
use crate::ids::{BattleLogId, EventId};
use crate::sqlite::repositories::{
    AutoSellRepo, BattleLogRepo, EventRepo, NewBattleLog, NewEvent, RunRepo,
};
use crate::store::ExplorationStore;
use crate::types::{
    BattleLogArchive, EncounterKind, EndState, ExplorationEventLogEntry, ExplorationRunRecord,
    ItemStack, RunIdentifier, RunResult, SuperRareState,
};

/// What a flush did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Transactions committed: 0 for an empty session, otherwise 1.
    pub commits: u32,
    /// Events written.
    pub events_appended: u32,
    /// Run state after the commit; `None` when nothing was committed.
    pub run: Option<ExplorationRunRecord>,
}

/// Queued mutations for one run, applied atomically on flush.
#[derive(Debug)]
pub struct EventSession {
    run: RunIdentifier,
    pending: Vec<PendingWrite>,
    terminal: Option<RunResult>,
}

#[derive(Debug)]
enum PendingWrite {
    Append(Box<PendingEvent>),
    Finalize(PendingFinal),
    Cancel { ended_at: DateTime<Utc> },
}

#[derive(Debug)]
struct PendingEvent {
    id: EventId,
    entry: ExplorationEventLogEntry,
    battle_log: Option<PendingBattleLog>,
    occurred_at: DateTime<Utc>,
    random_state: u64,
    super_rare: SuperRareState,
    dropped_item_ids: BTreeSet<u16>,
}

#[derive(Debug)]
struct PendingBattleLog {
    id: BattleLogId,
    enemy_id: u16,
    enemy_name: String,
    result: u8,
    turns: u8,
    timestamp: DateTime<Utc>,
    log_data: Vec<u8>,
}

#[derive(Debug)]
struct PendingFinal {
    end_state: EndState,
    ended_at: DateTime<Utc>,
    total_exp: u64,
    total_gold: u64,
    auto_sell_gold: u64,
    auto_sold_items: Vec<ItemStack>,
}

impl EventSession {
    /// Open an empty session against `run`.
    pub fn new(run: RunIdentifier) -> Self {
        Self {
            run,
            pending: Vec::new(),
            terminal: None,
        }
    }

    /// Run this session writes to.
    pub fn run(&self) -> RunIdentifier {
        self.run
    }

    /// Whether a flush would write anything.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queue one floor event.
    ///
    /// The run's totals grow by the event's exp and gold, `final_floor`
    /// becomes the event floor, and the RNG, daily super-rare and dropped-item
    /// checkpoints are overwritten. Returns the id the battle log will be
    /// stored under, if one was given.
    pub fn append_event(
        &mut self,
        entry: ExplorationEventLogEntry,
        battle_log: Option<BattleLogArchive>,
        occurred_at: DateTime<Utc>,
        random_state: u64,
        super_rare: SuperRareState,
        dropped_item_ids: BTreeSet<u16>,
    ) -> Result<Option<BattleLogId>> {
        self.ensure_open()?;
        let battle_log = match battle_log {
            None => None,
            Some(archive) => {
                if !matches!(entry.kind, EncounterKind::Combat { .. }) {
                    return Err(LedgerError::InvalidArgument(format!(
                        "battle log attached to {} event on floor {}",
                        entry.kind.tag(),
                        entry.floor
                    )));
                }
                Some(PendingBattleLog {
                    id: BattleLogId::new(),
                    log_data: codec::encode(&archive.log)?,
                    enemy_id: archive.enemy_id,
                    enemy_name: archive.enemy_name,
                    result: archive.result,
                    turns: archive.turns,
                    timestamp: archive.timestamp,
                })
            }
        };
        let battle_log_id = battle_log.as_ref().map(|log| log.id.clone());
        self.pending.push(PendingWrite::Append(Box::new(PendingEvent {
            id: EventId::new(),
            entry,
            battle_log,
            occurred_at,
            random_state,
            super_rare,
            dropped_item_ids,
        })));
        Ok(battle_log_id)
    }

    /// Queue the terminal `Completed` / `Defeated` transition.
    ///
    /// Totals are overwritten with the given final values and the run's
    /// auto-sell set is replaced by `auto_sold_items`.
    pub fn finalize_run(
        &mut self,
        end_state: EndState,
        ended_at: DateTime<Utc>,
        total_exp: u64,
        total_gold: u64,
        auto_sell_gold: u64,
        auto_sold_items: Vec<ItemStack>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.terminal = Some(end_state.result());
        self.pending.push(PendingWrite::Finalize(PendingFinal {
            end_state,
            ended_at,
            total_exp,
            total_gold,
            auto_sell_gold,
            auto_sold_items,
        }));
        Ok(())
    }

    /// Queue the terminal `Cancelled` transition. Totals are left alone.
    pub fn cancel_run(&mut self, ended_at: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        self.terminal = Some(RunResult::Cancelled);
        self.pending.push(PendingWrite::Cancel { ended_at });
        Ok(())
    }

    /// Commit queued writes in one transaction, if there are any.
    ///
    /// Fails with [`LedgerError::RunNotFound`] or
    /// [`LedgerError::RunNotRunning`] (nothing committed) when the run is
    /// missing or already terminal.
    #[instrument(skip_all, fields(run = %self.run, pending = self.pending.len()))]
    pub fn flush_if_needed(mut self, store: &ExplorationStore) -> Result<FlushReport> {
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            debug!("nothing to flush");
            return Ok(FlushReport::default());
        }
        let run = self.run;
        store.database().with_tx(|tx| apply(tx, &run, &pending))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.terminal {
            Some(_) => Err(LedgerError::RunNotRunning(self.run)),
            None => Ok(()),
        }
    }
}

impl Drop for EventSession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                run = %self.run,
                pending = self.pending.len(),
                "event session dropped with unflushed writes"
            );
        }
    }
}

fn apply(conn: &Connection, run: &RunIdentifier, pending: &[PendingWrite]) -> Result<FlushReport> {
    let stored = RunRepo::find(conn, run)?.ok_or(LedgerError::RunNotFound(*run))?;
    if stored.record.result.is_terminal() {
        return Err(LedgerError::RunNotRunning(*run));
    }
    let key = stored.key;
    let mut record = stored.record;
    let mut events_appended = 0;

    for write in pending {
        match write {
            PendingWrite::Append(event) => {
                EventRepo::insert(
                    conn,
                    &key,
                    &NewEvent {
                        id: &event.id,
                        sequence: record.event_count,
                        floor: event.entry.floor,
                        kind: event.entry.kind,
                        battle_result: event.battle_log.as_ref().map(|log| log.result),
                        exp: event.entry.exp,
                        gold: event.entry.gold,
                        occurred_at: event.occurred_at,
                        drops: &event.entry.drops,
                    },
                )?;
                if let Some(log) = &event.battle_log {
                    BattleLogRepo::insert(
                        conn,
                        &key,
                        &NewBattleLog {
                            id: &log.id,
                            event_id: &event.id,
                            enemy_id: log.enemy_id,
                            enemy_name: &log.enemy_name,
                            result: log.result,
                            turns: log.turns,
                            timestamp: log.timestamp,
                            log_data: &log.log_data,
                        },
                    )?;
                }
                record.event_count += 1;
                record.total_exp = record.total_exp.saturating_add(event.entry.exp);
                record.total_gold = record.total_gold.saturating_add(event.entry.gold);
                record.final_floor = event.entry.floor;
                record.random_state = event.random_state;
                record.super_rare = event.super_rare;
                record.dropped_item_ids.clone_from(&event.dropped_item_ids);
                events_appended += 1;
            }
            PendingWrite::Finalize(fin) => {
                record.result = fin.end_state.result();
                record.ended_at = Some(fin.ended_at);
                record.total_exp = fin.total_exp;
                record.total_gold = fin.total_gold;
                record.auto_sell_gold = fin.auto_sell_gold;
                if let EndState::Defeated { floor } = fin.end_state {
                    record.final_floor = floor;
                }
                AutoSellRepo::replace(conn, &key, &fin.auto_sold_items)?;
            }
            PendingWrite::Cancel { ended_at } => {
                record.result = RunResult::Cancelled;
                record.ended_at = Some(*ended_at);
            }
        }
    }

    RunRepo::update(conn, &key, &record)?;
    if record.result.is_terminal() {
        info!(run = %record.id, result = %record.result, "run closed");
    }
    Ok(FlushReport {
        commits: 1,
        events_appended,
        run: Some(record),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::sample_log;
    use crate::types::BeginRunParams;
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
    }

    fn begin(store: &ExplorationStore, party_id: u8) -> RunIdentifier {
        store
            .begin_run(&BeginRunParams {
                party_id,
                dungeon_id: 12,
                difficulty: 0,
                target_floor: 10,
                started_at: t0(),
                seed: 42,
            })
            .unwrap()
    }

    fn entry(floor: u16, kind: EncounterKind, exp: u64, gold: u64) -> ExplorationEventLogEntry {
        ExplorationEventLogEntry {
            floor,
            kind,
            exp,
            gold,
            drops: vec![ItemStack {
                item_id: 300 + floor,
                super_rare_title_id: 0,
                normal_title_id: 0,
                quantity: 1,
            }],
        }
    }

    fn archive() -> BattleLogArchive {
        BattleLogArchive {
            enemy_id: 40,
            enemy_name: "Bone Knight".into(),
            result: 0,
            turns: 1,
            timestamp: t0(),
            log: sample_log(),
        }
    }

    #[test]
    fn empty_flush_commits_nothing() {
        let store = ExplorationStore::in_memory().unwrap();
        let session = store.open_session(begin(&store, 1));
        assert!(!session.has_pending());
        assert_eq!(session.flush_if_needed(&store).unwrap(), FlushReport::default());
    }

    #[test]
    fn empty_flush_does_not_touch_storage() {
        // The run does not even exist; an empty flush must not look.
        let store = ExplorationStore::in_memory().unwrap();
        let session = EventSession::new(RunIdentifier::new(1, t0()));
        assert_eq!(session.flush_if_needed(&store).unwrap().commits, 0);
    }

    #[test]
    fn appends_accumulate_totals_and_overwrite_checkpoints() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 1);
        let rare = SuperRareState {
            jst_date: NaiveDate::from_ymd_opt(2026, 8, 1),
            has_triggered: true,
        };

        let mut session = store.open_session(id);
        let none = session
            .append_event(
                entry(1, EncounterKind::Nothing, 10, 3),
                None,
                t0(),
                100,
                SuperRareState::default(),
                BTreeSet::from([301]),
            )
            .unwrap();
        assert!(none.is_none());
        let log_id = session
            .append_event(
                entry(2, EncounterKind::Combat { enemy_id: 40 }, 25, 7),
                Some(archive()),
                t0() + Duration::minutes(1),
                200,
                rare,
                BTreeSet::from([301, 302]),
            )
            .unwrap()
            .unwrap();
        let report = session.flush_if_needed(&store).unwrap();
        assert_eq!(report.commits, 1);
        assert_eq!(report.events_appended, 2);

        let snapshot = store.exploration_snapshot(id).unwrap();
        let run = &snapshot.run;
        assert_eq!(run.total_exp, 35);
        assert_eq!(run.total_gold, 10);
        assert_eq!(run.final_floor, 2);
        assert_eq!(run.random_state, 200);
        assert_eq!(run.super_rare, rare);
        assert_eq!(run.dropped_item_ids, BTreeSet::from([301, 302]));
        assert_eq!(run.event_count, 2);
        assert_eq!(report.run.as_ref(), Some(run));

        let sequences: Vec<_> = snapshot.events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(snapshot.events[0].battle_result, None);
        assert_eq!(snapshot.events[1].battle_result, Some(0));
        assert_eq!(snapshot.events[1].battle_log_id.as_ref(), Some(&log_id));

        let (record, log) = store.battle_log(&log_id).unwrap();
        assert_eq!(record.enemy_name, "Bone Knight");
        assert_eq!(log, sample_log());
    }

    #[test]
    fn sequences_continue_across_sessions() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 1);
        for floor in 1..=3 {
            let mut session = store.open_session(id);
            let _ = session
                .append_event(
                    entry(floor, EncounterKind::Nothing, 1, 1),
                    None,
                    t0(),
                    u64::from(floor),
                    SuperRareState::default(),
                    BTreeSet::new(),
                )
                .unwrap();
            let _ = session.flush_if_needed(&store).unwrap();
        }
        let snapshot = store.exploration_snapshot(id).unwrap();
        let sequences: Vec<_> = snapshot.events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(snapshot.run.total_exp, 3);
    }

    #[test]
    fn finalize_overwrites_totals_and_replaces_auto_sell() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 1);
        let mut session = store.open_session(id);
        let _ = session
            .append_event(
                entry(4, EncounterKind::Scripted { event_id: 2 }, 50, 50),
                None,
                t0(),
                1,
                SuperRareState::default(),
                BTreeSet::new(),
            )
            .unwrap();
        let sold = vec![ItemStack {
            item_id: 7,
            super_rare_title_id: 0,
            normal_title_id: 2,
            quantity: 3,
        }];
        session
            .finalize_run(
                EndState::Defeated { floor: 6 },
                t0() + Duration::hours(1),
                999,
                888,
                77,
                sold.clone(),
            )
            .unwrap();
        let _ = session.flush_if_needed(&store).unwrap();

        let snapshot = store.exploration_snapshot(id).unwrap();
        assert_eq!(snapshot.run.result, RunResult::Defeated);
        assert_eq!(snapshot.run.final_floor, 6);
        assert_eq!(snapshot.run.total_exp, 999);
        assert_eq!(snapshot.run.total_gold, 888);
        assert_eq!(snapshot.run.auto_sell_gold, 77);
        assert_eq!(snapshot.run.ended_at, Some(t0() + Duration::hours(1)));
        assert_eq!(snapshot.auto_sold_items, sold);
        assert!(store.running_summaries().unwrap().is_empty());
    }

    #[test]
    fn completed_keeps_last_floor() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 1);
        let mut session = store.open_session(id);
        let _ = session
            .append_event(
                entry(10, EncounterKind::Nothing, 0, 0),
                None,
                t0(),
                1,
                SuperRareState::default(),
                BTreeSet::new(),
            )
            .unwrap();
        session
            .finalize_run(EndState::Completed, t0(), 0, 0, 0, vec![])
            .unwrap();
        let report = session.flush_if_needed(&store).unwrap();
        let run = report.run.unwrap();
        assert_eq!(run.result, RunResult::Completed);
        assert_eq!(run.final_floor, 10);
    }

    #[test]
    fn writes_after_terminal_are_refused() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 1);
        let mut session = store.open_session(id);
        session.cancel_run(t0()).unwrap();
        assert_matches!(
            session.append_event(
                entry(1, EncounterKind::Nothing, 0, 0),
                None,
                t0(),
                0,
                SuperRareState::default(),
                BTreeSet::new(),
            ),
            Err(LedgerError::RunNotRunning(_))
        );
        assert_matches!(session.cancel_run(t0()), Err(LedgerError::RunNotRunning(_)));
        let _ = session.flush_if_needed(&store).unwrap();

        // A new session against the closed run fails at flush, writing nothing.
        let mut late = store.open_session(id);
        let _ = late
            .append_event(
                entry(1, EncounterKind::Nothing, 5, 5),
                None,
                t0(),
                0,
                SuperRareState::default(),
                BTreeSet::new(),
            )
            .unwrap();
        assert_matches!(late.flush_if_needed(&store), Err(LedgerError::RunNotRunning(_)));
        let snapshot = store.exploration_snapshot(id).unwrap();
        assert!(snapshot.events.is_empty());
        assert_eq!(snapshot.run.total_exp, 0);
    }

    #[test]
    fn battle_log_requires_combat() {
        let mut session = EventSession::new(RunIdentifier::new(1, t0()));
        assert_matches!(
            session.append_event(
                entry(1, EncounterKind::Scripted { event_id: 1 }, 0, 0),
                Some(archive()),
                t0(),
                0,
                SuperRareState::default(),
                BTreeSet::new(),
            ),
            Err(LedgerError::InvalidArgument(_))
        );
        assert!(!session.has_pending());
    }

    #[test]
    fn unencodable_log_is_refused_when_queued() {
        let mut session = EventSession::new(RunIdentifier::new(1, t0()));
        let mut bad = archive();
        bad.log.player_snapshots[0].name = "x".repeat(300);
        assert_matches!(
            session.append_event(
                entry(1, EncounterKind::Combat { enemy_id: 40 }, 0, 0),
                Some(bad),
                t0(),
                0,
                SuperRareState::default(),
                BTreeSet::new(),
            ),
            Err(LedgerError::Codec(_))
        );
    }

    #[test]
    fn missing_run_fails_atomically() {
        let store = ExplorationStore::in_memory().unwrap();
        let mut session = EventSession::new(RunIdentifier::new(5, t0()));
        session.cancel_run(t0()).unwrap();
        assert_matches!(
            session.flush_if_needed(&store),
            Err(LedgerError::RunNotFound(_))
        );
    }

    #[test]
    fn overflowing_auto_sell_aborts_finalize() {
        let store = ExplorationStore::in_memory().unwrap();
        let id = begin(&store, 2);
        let stack = ItemStack {
            item_id: 5,
            super_rare_title_id: 0,
            normal_title_id: 0,
            quantity: 3_000_000_000,
        };
        let mut session = store.open_session(id);
        session
            .finalize_run(EndState::Completed, t0(), 10, 10, 10, vec![stack; 2])
            .unwrap();
        assert_matches!(
            session.flush_if_needed(&store),
            Err(LedgerError::InvalidArgument(_))
        );

        let snapshot = store.exploration_snapshot(id).unwrap();
        assert_eq!(snapshot.run.result, RunResult::Running);
        assert!(snapshot.auto_sold_items.is_empty());
    }
}
