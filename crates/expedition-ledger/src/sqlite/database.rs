use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;
use crate::sqlite::migrations;

/// Connection settings applied when the database is opened.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionConfig {
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

/// Mutex-guarded `SQLite` connection. Every repository call runs under the
/// lock, so the ledger has exactly one writer per process.
#[derive(Clone)]
pub(crate) struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database file, creating parent directories.
    pub(crate) fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::prepare(&conn, config)?;
        info!(path = %path.display(), "ledger database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open a private in-memory database.
    pub(crate) fn in_memory(config: &ConnectionConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(&conn, config)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn prepare(conn: &Connection, config: &ConnectionConfig) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            config.busy_timeout_ms
        ))?;
        let _ = migrations::run_migrations(conn)?;
        Ok(())
    }

    /// Run `f` with the connection locked.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside one transaction; commits on `Ok`, rolls back on `Err`.
    pub(crate) fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
