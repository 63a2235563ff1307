//! Stateless repositories, one per table family. Every method takes a
//! `&Connection` so the store can compose them inside one transaction.

pub(crate) mod auto_sell;
pub(crate) mod battle_log;
pub(crate) mod event;
pub(crate) mod run;

pub(crate) use auto_sell::AutoSellRepo;
pub(crate) use battle_log::{BattleLogRepo, NewBattleLog};
pub(crate) use event::{EventRepo, NewEvent};
pub(crate) use run::{RunRepo, StoredRun};
