//! High-level transactional ledger API.
//!
//! Composes the repositories into run-centric operations. Every write runs
//! inside one `SQLite` transaction, so callers never observe a half-applied
//! run, event, or purge.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, instrument};

use crate::codec::BattleLog;
use crate::errors::{LedgerError, Result};
use crate::ids::BattleLogId;
use crate::resume::restore_party_hp;
use crate::retention::{self, PurgeReport, RetentionPolicy};
use crate::session::EventSession;
use crate::sqlite::database::{ConnectionConfig, Database};
use crate::sqlite::repositories::{AutoSellRepo, BattleLogRepo, EventRepo, RunRepo, StoredRun};
use crate::types::{
    BattleLogRecord, BeginRunParams, ExplorationResumeSnapshot, ExplorationSnapshot,
    ExplorationSummary, RunIdentifier,
};

/// Storage and retention settings for [`ExplorationStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Run history bound.
    pub retention: RetentionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            retention: RetentionPolicy::default(),
        }
    }
}

/// The exploration run ledger.
#[derive(Clone)]
pub struct ExplorationStore {
    db: Database,
    retention: RetentionPolicy,
}

impl ExplorationStore {
    /// Open or create a ledger database at `path`.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let db = Database::open(path, &connection_config(config))?;
        Ok(Self {
            db,
            retention: config.retention,
        })
    }

    /// In-memory ledger with `config`.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let db = Database::in_memory(&connection_config(config))?;
        Ok(Self {
            db,
            retention: config.retention,
        })
    }

    /// In-memory ledger with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::open_in_memory(&StoreConfig::default())
    }

    /// Database file path (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        self.db.path()
    }

    /// Retention policy in effect.
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    // ─────────────────────────────────────────────────────────────────────
    // Run lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start a run.
    ///
    /// Fails with [`LedgerError::PartyBusy`] when the party already has a
    /// running run, and with [`LedgerError::InvalidArgument`] when a run with
    /// the same identifier exists.
    #[instrument(skip(self, params), fields(party_id = params.party_id, dungeon_id = params.dungeon_id))]
    pub fn begin_run(&self, params: &BeginRunParams) -> Result<RunIdentifier> {
        let retention = self.retention;
        self.db.with_tx(|tx| {
            check_can_begin(tx, params)?;
            if retention.purge_on_begin {
                let _ = retention::make_room(tx, retention.capacity, 1)?;
            }
            let _ = RunRepo::insert(tx, params)?;
            Ok(())
        })?;
        let id = params.identifier();
        info!(run = %id, seed = params.seed, "run started");
        Ok(id)
    }

    /// Start runs for several parties in one transaction. Either every run
    /// is created or none is.
    #[instrument(skip_all, fields(count = params.len()))]
    pub fn begin_runs_batch(&self, params: &[BeginRunParams]) -> Result<BTreeMap<u8, RunIdentifier>> {
        let mut seen = BTreeSet::new();
        for p in params {
            if !seen.insert(p.party_id) {
                return Err(LedgerError::InvalidArgument(format!(
                    "party {} appears twice in batch",
                    p.party_id
                )));
            }
        }

        let retention = self.retention;
        self.db.with_tx(|tx| {
            for p in params {
                check_can_begin(tx, p)?;
            }
            if retention.purge_on_begin && !params.is_empty() {
                let _ = retention::make_room(tx, retention.capacity, params.len() as u32)?;
            }
            for p in params {
                let _ = RunRepo::insert(tx, p)?;
            }
            Ok(())
        })?;

        let ids: BTreeMap<u8, RunIdentifier> =
            params.iter().map(|p| (p.party_id, p.identifier())).collect();
        info!(count = ids.len(), "runs started");
        Ok(ids)
    }

    /// Mark a running run as cancelled.
    pub fn cancel_run(&self, id: RunIdentifier, ended_at: DateTime<Utc>) -> Result<()> {
        let mut session = self.open_session(id);
        session.cancel_run(ended_at)?;
        let _ = session.flush_if_needed(self)?;
        Ok(())
    }

    /// Start a batch of writes against `id`.
    pub fn open_session(&self, id: RunIdentifier) -> EventSession {
        EventSession::new(id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Most recent runs of one party, newest first. Running runs carry
    /// their full event log.
    pub fn recent_exploration_summaries(
        &self,
        party_id: u8,
        limit: u32,
    ) -> Result<Vec<ExplorationSummary>> {
        self.db.with_conn(|conn| {
            let runs = RunRepo::list_recent(conn, party_id, limit)?;
            summaries(conn, runs)
        })
    }

    /// Up to `limit_per_party` most recent runs of every party, ordered by
    /// party then newest first.
    pub fn recent_exploration_summaries_per_party(
        &self,
        limit_per_party: u32,
    ) -> Result<Vec<ExplorationSummary>> {
        self.db.with_conn(|conn| {
            let runs = RunRepo::list_recent_per_party(conn, limit_per_party)?;
            summaries(conn, runs)
        })
    }

    /// Full detail of one run.
    pub fn exploration_snapshot(&self, id: RunIdentifier) -> Result<ExplorationSnapshot> {
        self.db.with_conn(|conn| {
            let stored = RunRepo::find(conn, &id)?.ok_or(LedgerError::RunNotFound(id))?;
            Ok(ExplorationSnapshot {
                events: EventRepo::list_for_run(conn, &stored.key)?,
                auto_sold_items: AutoSellRepo::list(conn, &stored.key)?,
                run: stored.record,
            })
        })
    }

    /// Identifiers of every running run (the startup orphan scan).
    pub fn running_summaries(&self) -> Result<Vec<RunIdentifier>> {
        self.db.with_conn(RunRepo::list_running)
    }

    /// One battle log row and its decoded content.
    pub fn battle_log(&self, id: &BattleLogId) -> Result<(BattleLogRecord, BattleLog)> {
        let record = self
            .db
            .with_conn(|conn| BattleLogRepo::get(conn, id))?
            .ok_or_else(|| LedgerError::BattleLogNotFound(id.to_string()))?;
        let log = record.decode_log()?;
        Ok((record, log))
    }

    /// Number of stored runs.
    pub fn run_count(&self) -> Result<u32> {
        self.db.with_conn(RunRepo::count)
    }

    /// Everything needed to continue an interrupted run, including party HP
    /// replayed from the latest battle log.
    #[instrument(skip(self))]
    pub fn resume_snapshot(&self, id: RunIdentifier) -> Result<ExplorationResumeSnapshot> {
        let (run, latest) = self.db.with_conn(|conn| {
            let stored = RunRepo::find(conn, &id)?.ok_or(LedgerError::RunNotFound(id))?;
            if stored.record.result.is_terminal() {
                return Err(LedgerError::RunNotRunning(id));
            }
            let latest = BattleLogRepo::latest_for_run(conn, &stored.key)?;
            Ok((stored.record, latest))
        })?;

        Ok(ExplorationResumeSnapshot {
            run_id: run.id,
            dungeon_id: run.dungeon_id,
            target_floor: run.target_floor,
            difficulty: run.difficulty,
            random_state: run.random_state,
            super_rare: run.super_rare,
            dropped_item_ids: run.dropped_item_ids,
            event_count: run.event_count,
            restored_party_hp_by_character_id: restore_party_hp(latest.as_ref()),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Retention
    // ─────────────────────────────────────────────────────────────────────

    /// Trim history: when the run count is at or above capacity, delete the
    /// `count - capacity + 1` oldest finished runs.
    #[instrument(skip(self), fields(capacity = self.retention.capacity))]
    pub fn purge(&self) -> Result<PurgeReport> {
        let capacity = self.retention.capacity;
        self.db.with_tx(|tx| retention::make_room(tx, capacity, 1))
    }
}

fn connection_config(config: &StoreConfig) -> ConnectionConfig {
    ConnectionConfig {
        busy_timeout_ms: config.busy_timeout_ms,
    }
}

fn check_can_begin(conn: &Connection, params: &BeginRunParams) -> Result<()> {
    if let Some(running) = RunRepo::running_for_party(conn, params.party_id)? {
        return Err(LedgerError::PartyBusy {
            party_id: params.party_id,
            started_at: running.record.id.started_at,
        });
    }
    if RunRepo::find(conn, &params.identifier())?.is_some() {
        return Err(LedgerError::InvalidArgument(format!(
            "run {} already exists",
            params.identifier()
        )));
    }
    Ok(())
}

fn summaries(conn: &Connection, runs: Vec<StoredRun>) -> Result<Vec<ExplorationSummary>> {
    runs.into_iter()
        .map(|stored| {
            let events = if stored.record.result.is_terminal() {
                None
            } else {
                Some(EventRepo::list_for_run(conn, &stored.key)?)
            };
            Ok(ExplorationSummary {
                run: stored.record,
                events,
            })
        })
        .collect()
}
