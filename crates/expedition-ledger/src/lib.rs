//! # expedition-ledger
//!
//! Durable ledger for timed exploration runs, with a `SQLite` backend.
//!
//! The crate is responsible for:
//!
//! - **Battle log codec**: versioned little-endian binary format for one combat
//! - **Run record store**: run lifecycle, per-run event ledger, read models
//! - **Event session**: batched, single-commit mutations against one run
//! - **Resume reconstruction**: party HP recovered by replaying the latest log
//! - **Retention**: bounded run history, never touching a running run
//! - **Ledger worker**: the single serialized writer fronted by an async handle

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod resume;
pub mod retention;
pub mod session;
pub mod store;
pub mod types;
pub mod worker;

pub(crate) mod sqlite;

pub use codec::{BattleLog, CodecError};
pub use errors::{LedgerError, Result};
pub use ids::{BattleLogId, EventId};
pub use retention::{PurgeReport, RetentionPolicy};
pub use session::{EventSession, FlushReport};
pub use store::{ExplorationStore, StoreConfig};
pub use types::*;
pub use worker::{LedgerHandle, LedgerWorker, spawn_periodic_purge};
