//! Ledger worker: the single serialized writer.
//!
//! A dedicated thread owns the [`ExplorationStore`] and executes
//! commands one at a time from a bounded channel. [`LedgerHandle`] is the
//! cloneable async front-end; each request carries a `oneshot` reply.
//! A caller that stops waiting does not abort its command: the worker still
//! runs it to completion and discards the reply.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::BattleLog;
use crate::errors::{LedgerError, Result};
use crate::ids::BattleLogId;
use crate::retention::PurgeReport;
use crate::session::{EventSession, FlushReport};
use crate::store::ExplorationStore;
use crate::types::{
    BattleLogRecord, BeginRunParams, ExplorationResumeSnapshot, ExplorationSnapshot,
    ExplorationSummary, RunIdentifier,
};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests executed by the worker.
pub(crate) enum Command {
    /// Start one run.
    BeginRun {
        params: BeginRunParams,
        reply: Reply<RunIdentifier>,
    },
    /// Start several runs atomically.
    BeginRunsBatch {
        params: Vec<BeginRunParams>,
        reply: Reply<BTreeMap<u8, RunIdentifier>>,
    },
    /// Cancel a running run.
    CancelRun {
        id: RunIdentifier,
        ended_at: DateTime<Utc>,
        reply: Reply<()>,
    },
    /// Commit a prepared session.
    FlushSession {
        session: EventSession,
        reply: Reply<FlushReport>,
    },
    /// Recent runs of one party.
    RecentSummaries {
        party_id: u8,
        limit: u32,
        reply: Reply<Vec<ExplorationSummary>>,
    },
    /// Recent runs of every party.
    RecentSummariesPerParty {
        limit_per_party: u32,
        reply: Reply<Vec<ExplorationSummary>>,
    },
    /// Full detail of one run.
    Snapshot {
        id: RunIdentifier,
        reply: Reply<ExplorationSnapshot>,
    },
    /// Running runs.
    RunningSummaries { reply: Reply<Vec<RunIdentifier>> },
    /// One battle log.
    BattleLog {
        id: BattleLogId,
        reply: Reply<(BattleLogRecord, BattleLog)>,
    },
    /// Resume state of a running run.
    ResumeSnapshot {
        id: RunIdentifier,
        reply: Reply<ExplorationResumeSnapshot>,
    },
    /// Number of stored runs.
    RunCount { reply: Reply<u32> },
    /// Retention pass. `reply` is `None` for fire-and-forget triggers.
    Purge { reply: Option<Reply<PurgeReport>> },
}

/// Owns the store and drains the command queue.
pub struct LedgerWorker {
    store: ExplorationStore,
    command_rx: mpsc::Receiver<Command>,
}

impl LedgerWorker {
    /// Start the worker thread. The thread exits once every
    /// [`LedgerHandle`] clone has been dropped and the queue is drained.
    pub fn spawn(store: ExplorationStore, queue_depth: usize) -> Result<(LedgerHandle, JoinHandle<()>)> {
        let (command_tx, command_rx) = mpsc::channel(queue_depth.max(1));
        let worker = Self { store, command_rx };
        let thread = thread::Builder::new()
            .name("ledger-worker".into())
            .spawn(move || worker.run())?;
        Ok((LedgerHandle { command_tx }, thread))
    }

    fn run(mut self) {
        info!(path = %self.store.path().display(), "ledger worker started");
        while let Some(cmd) = self.command_rx.blocking_recv() {
            self.handle_command(cmd);
        }
        info!("ledger worker stopped");
    }

    fn handle_command(&self, cmd: Command) {
        let store = &self.store;
        match cmd {
            Command::BeginRun { params, reply } => {
                respond("BeginRun", reply, store.begin_run(&params));
            }
            Command::BeginRunsBatch { params, reply } => {
                respond("BeginRunsBatch", reply, store.begin_runs_batch(&params));
            }
            Command::CancelRun { id, ended_at, reply } => {
                respond("CancelRun", reply, store.cancel_run(id, ended_at));
            }
            Command::FlushSession { session, reply } => {
                respond("FlushSession", reply, session.flush_if_needed(store));
            }
            Command::RecentSummaries {
                party_id,
                limit,
                reply,
            } => {
                respond(
                    "RecentSummaries",
                    reply,
                    store.recent_exploration_summaries(party_id, limit),
                );
            }
            Command::RecentSummariesPerParty {
                limit_per_party,
                reply,
            } => {
                respond(
                    "RecentSummariesPerParty",
                    reply,
                    store.recent_exploration_summaries_per_party(limit_per_party),
                );
            }
            Command::Snapshot { id, reply } => {
                respond("Snapshot", reply, store.exploration_snapshot(id));
            }
            Command::RunningSummaries { reply } => {
                respond("RunningSummaries", reply, store.running_summaries());
            }
            Command::BattleLog { id, reply } => {
                respond("BattleLog", reply, store.battle_log(&id));
            }
            Command::ResumeSnapshot { id, reply } => {
                respond("ResumeSnapshot", reply, store.resume_snapshot(id));
            }
            Command::RunCount { reply } => {
                respond("RunCount", reply, store.run_count());
            }
            Command::Purge { reply } => {
                let result = store.purge();
                match reply {
                    Some(reply) => respond("Purge", reply, result),
                    None => {
                        if let Err(error) = result {
                            warn!(%error, "background purge failed, will retry on next trigger");
                        }
                    }
                }
            }
        }
    }
}

fn respond<T>(command: &'static str, reply: Reply<T>, result: Result<T>) {
    if reply.send(result).is_err() {
        debug!(command, "reply channel closed (caller dropped)");
    }
}

/// Cloneable async front-end to the [`LedgerWorker`].
#[derive(Clone)]
pub struct LedgerHandle {
    command_tx: mpsc::Sender<Command>,
}

impl LedgerHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::WorkerClosed)?;
        rx.await.map_err(|_| LedgerError::WorkerClosed)?
    }

    /// See [`ExplorationStore::begin_run`].
    pub async fn begin_run(&self, params: BeginRunParams) -> Result<RunIdentifier> {
        self.request(|reply| Command::BeginRun { params, reply }).await
    }

    /// See [`ExplorationStore::begin_runs_batch`].
    pub async fn begin_runs_batch(
        &self,
        params: Vec<BeginRunParams>,
    ) -> Result<BTreeMap<u8, RunIdentifier>> {
        self.request(|reply| Command::BeginRunsBatch { params, reply })
            .await
    }

    /// See [`ExplorationStore::cancel_run`].
    pub async fn cancel_run(&self, id: RunIdentifier, ended_at: DateTime<Utc>) -> Result<()> {
        self.request(|reply| Command::CancelRun {
            id,
            ended_at,
            reply,
        })
        .await
    }

    /// Commit a session on the worker. Sessions without pending writes
    /// are resolved locally and never reach the queue.
    pub async fn flush_session(&self, session: EventSession) -> Result<FlushReport> {
        if !session.has_pending() {
            return Ok(FlushReport::default());
        }
        self.request(|reply| Command::FlushSession { session, reply })
            .await
    }

    /// See [`ExplorationStore::recent_exploration_summaries`].
    pub async fn recent_exploration_summaries(
        &self,
        party_id: u8,
        limit: u32,
    ) -> Result<Vec<ExplorationSummary>> {
        self.request(|reply| Command::RecentSummaries {
            party_id,
            limit,
            reply,
        })
        .await
    }

    /// See [`ExplorationStore::recent_exploration_summaries_per_party`].
    pub async fn recent_exploration_summaries_per_party(
        &self,
        limit_per_party: u32,
    ) -> Result<Vec<ExplorationSummary>> {
        self.request(|reply| Command::RecentSummariesPerParty {
            limit_per_party,
            reply,
        })
        .await
    }

    /// See [`ExplorationStore::exploration_snapshot`].
    pub async fn exploration_snapshot(&self, id: RunIdentifier) -> Result<ExplorationSnapshot> {
        self.request(|reply| Command::Snapshot { id, reply }).await
    }

    /// See [`ExplorationStore::running_summaries`].
    pub async fn running_summaries(&self) -> Result<Vec<RunIdentifier>> {
        self.request(|reply| Command::RunningSummaries { reply })
            .await
    }

    /// See [`ExplorationStore::battle_log`].
    pub async fn battle_log(&self, id: BattleLogId) -> Result<(BattleLogRecord, BattleLog)> {
        self.request(|reply| Command::BattleLog { id, reply }).await
    }

    /// See [`ExplorationStore::resume_snapshot`].
    pub async fn resume_snapshot(&self, id: RunIdentifier) -> Result<ExplorationResumeSnapshot> {
        self.request(|reply| Command::ResumeSnapshot { id, reply })
            .await
    }

    /// See [`ExplorationStore::run_count`].
    pub async fn run_count(&self) -> Result<u32> {
        self.request(|reply| Command::RunCount { reply }).await
    }

    /// Run a retention pass and wait for its report.
    pub async fn purge(&self) -> Result<PurgeReport> {
        self.request(|reply| Command::Purge { reply: Some(reply) })
            .await
    }

    /// Queue a retention pass without waiting (the app-foreground trigger).
    /// Returns `false` when the queue is full or the worker is gone; the
    /// next trigger retries.
    pub fn request_purge(&self) -> bool {
        match self.command_tx.try_send(Command::Purge { reply: None }) {
            Ok(()) => true,
            Err(error) => {
                debug!(%error, "purge request not queued");
                false
            }
        }
    }
}

/// Enqueue a purge every `interval` until the worker shuts down.
pub fn spawn_periodic_purge(
    handle: LedgerHandle,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let _ = ticker.tick().await;
            match handle.purge().await {
                Ok(report) => debug!(deleted = report.deleted, remaining = report.remaining, "periodic purge"),
                Err(LedgerError::WorkerClosed) => {
                    debug!("ledger worker closed, stopping periodic purge");
                    break;
                }
                Err(error) => warn!(%error, "periodic purge failed, will retry"),
            }
        }
    })
}
