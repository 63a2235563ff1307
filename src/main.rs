//! # expedition
//!
//! Operator CLI for the exploration run ledger: inspect orphaned runs, rebuild
//! resume state, browse history, decode battle logs and trim old runs. Every
//! command prints JSON on stdout; logs go to stderr.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use expedition_ledger::{
    BattleLogId, ExplorationStore, LedgerHandle, LedgerWorker, RetentionPolicy, RunIdentifier,
    StoreConfig, spawn_periodic_purge,
};
use expedition_settings::{ExpeditionSettings, load_settings_from_path, settings_path};
use expedition_telemetry::{TelemetryConfig, init_telemetry, parse_level};
use serde_json::json;
use tracing::{info, warn};

/// Exploration run ledger CLI.
#[derive(Parser, Debug)]
#[command(name = "expedition", about = "Inspect and maintain the exploration run ledger")]
struct Cli {
    /// Settings file (defaults to `~/.expedition/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Ledger database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List runs still marked running (interrupted by a crash or kill).
    Orphans,
    /// Rebuild the resume snapshot of a running run.
    Resume(RunArgs),
    /// Recent runs of one party, newest first.
    History {
        /// Party id.
        #[arg(long)]
        party: u8,
        /// Maximum runs to list.
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Full snapshot of one run, events included.
    Show(RunArgs),
    /// Decode one stored battle log.
    BattleLog {
        /// Battle log id (`blog_…`).
        id: String,
    },
    /// Run one retention pass now.
    Purge,
    /// Keep the ledger trimmed on the configured interval until Ctrl-C.
    Maintain,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Party id.
    #[arg(long)]
    party: u8,
    /// Run start instant, RFC 3339 (e.g. `2026-03-01T09:30:00Z`).
    #[arg(long, value_parser = parse_started_at)]
    started_at: DateTime<Utc>,
}

impl RunArgs {
    fn identifier(&self) -> RunIdentifier {
        RunIdentifier::new(self.party, self.started_at)
    }
}

fn parse_started_at(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn telemetry_config(settings: &ExpeditionSettings) -> TelemetryConfig {
    let defaults = TelemetryConfig::default();
    let log_level = parse_level(&settings.logging.level).unwrap_or(defaults.log_level);
    let module_levels = settings
        .logging
        .modules
        .iter()
        .filter_map(|m| parse_level(&m.level).map(|level| (m.module.clone(), level)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        json: settings.logging.json,
    }
}

fn store_config(settings: &ExpeditionSettings) -> StoreConfig {
    StoreConfig {
        busy_timeout_ms: u32::try_from(settings.storage.busy_timeout_ms).unwrap_or(u32::MAX),
        retention: RetentionPolicy {
            capacity: settings.retention.capacity,
            purge_on_begin: settings.retention.purge_on_begin,
        },
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_command(
    command: Command,
    handle: &LedgerHandle,
    settings: &ExpeditionSettings,
) -> Result<()> {
    match command {
        Command::Orphans => {
            let running = handle.running_summaries().await?;
            info!(count = running.len(), "running runs found");
            print_json(&running)
        }
        Command::Resume(args) => {
            let snapshot = handle
                .resume_snapshot(args.identifier())
                .await
                .with_context(|| format!("cannot resume {}", args.identifier()))?;
            print_json(&snapshot)
        }
        Command::History { party, limit } => {
            print_json(&handle.recent_exploration_summaries(party, limit).await?)
        }
        Command::Show(args) => print_json(&handle.exploration_snapshot(args.identifier()).await?),
        Command::BattleLog { id } => {
            let (record, log) = handle.battle_log(BattleLogId::from_raw(id)).await?;
            print_json(&json!({
                "id": record.id,
                "enemyId": record.enemy_id,
                "enemyName": record.enemy_name,
                "result": record.result,
                "turns": record.turns,
                "timestamp": record.timestamp,
                "log": log,
            }))
        }
        Command::Purge => print_json(&handle.purge().await?),
        Command::Maintain => {
            let secs = settings.retention.purge_interval_secs;
            if secs == 0 {
                warn!("retention.purgeIntervalSecs is 0, background purge disabled");
                return Ok(());
            }
            let task = spawn_periodic_purge(handle.clone(), Duration::from_secs(secs));
            info!(interval_secs = secs, "background purge running, Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            task.abort();
            info!("shutting down");
            print_json(&json!({ "runs": handle.run_count().await? }))
        }
    }
}

fn open_store(path: &Path, settings: &ExpeditionSettings) -> Result<ExplorationStore> {
    ExplorationStore::open(path, &store_config(settings))
        .with_context(|| format!("failed to open ledger at {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&settings_file)
        .with_context(|| format!("failed to load settings from {}", settings_file.display()))?;
    let _ = init_telemetry(&telemetry_config(&settings));

    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.storage.database_path));
    let store = open_store(&db_path, &settings)?;
    info!(path = %db_path.display(), "ledger opened");

    let (handle, worker) = LedgerWorker::spawn(store, settings.worker.queue_depth)?;
    let outcome = run_command(cli.command, &handle, &settings).await;

    drop(handle);
    if !matches!(
        tokio::task::spawn_blocking(move || worker.join()).await,
        Ok(Ok(()))
    ) {
        warn!("ledger worker did not shut down cleanly");
    }
    outcome
}
