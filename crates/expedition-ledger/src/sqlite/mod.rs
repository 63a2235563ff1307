//! `SQLite` persistence: connection handling, migrations, row mapping and
//! the stateless repositories the store composes into transactions.

pub(crate) mod database;
pub(crate) mod migrations;
pub(crate) mod repositories;
pub(crate) mod row_helpers;
