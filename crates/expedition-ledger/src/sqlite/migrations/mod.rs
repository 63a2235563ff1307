//! Schema migration runner for the ledger database.
//!
//! Migrations are embedded at compile time via [`include_str!`] and applied in
//! version order, each inside its own transaction. The `schema_version` table
//! records what has been applied, so running the migrator twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{LedgerError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "runs, events, drops, battle logs, auto-sell items",
    sql: include_str!("v001_schema.sql"),
}];

/// Apply every migration newer than the recorded schema version.
///
/// Returns the number of migrations applied.
pub(crate) fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied version, or 0 on a fresh database.
pub(crate) fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| LedgerError::Migration {
        message: format!("failed to read schema_version: {e}"),
    })
}

/// Latest version known to this build.
pub(crate) fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| LedgerError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let fail = |stage: &str, e: rusqlite::Error| LedgerError::Migration {
        message: format!("v{} {stage}: {e}", migration.version),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| fail("begin", e))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| fail("apply", e))?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description)
             VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| fail("record", e))?;
    tx.commit().map_err(|e| fail("commit", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_gets_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 1);
        let tables = table_names(&conn);
        for expected in [
            "auto_sell_items",
            "battle_logs",
            "event_drops",
            "events",
            "runs",
            "schema_version",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn rerun_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn running_index_rejects_second_running_run() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        let insert = "INSERT INTO runs (id, party_id, started_at, dungeon_id, difficulty,
                      target_floor, seed, random_state) VALUES (?1, 1, ?2, 1, 0, 1, 0, 0)";
        let _ = conn.execute(insert, ["run_a", "2026-01-01"]).unwrap();
        assert!(conn.execute(insert, ["run_b", "2026-01-02"]).is_err());
        let _ = conn
            .execute("UPDATE runs SET result = 'cancelled' WHERE id = 'run_a'", [])
            .unwrap();
        let _ = conn.execute(insert, ["run_b", "2026-01-02"]).unwrap();
    }
}
