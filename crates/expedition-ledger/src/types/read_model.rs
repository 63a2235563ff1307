//! Read-side views of the ledger.
//!
//! These are finished snapshots handed to collaborators. Nothing here writes;
//! display names are resolved through [`MasterDataLookup`] only when a
//! [`CachedExploration`] is built.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, BattleLog, CodecError};
use crate::ids::BattleLogId;
use crate::types::{EncounterKind, ItemStack, RunIdentifier, RunResult, SuperRareState};

/// Stored state of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationRunRecord {
    /// Natural key.
    pub id: RunIdentifier,
    /// Dungeon master-data id.
    pub dungeon_id: u16,
    /// Difficulty tier.
    pub difficulty: u8,
    /// Floor at which the run completes.
    pub target_floor: u16,
    /// Initial RNG seed.
    pub seed: u64,
    /// RNG state as of the last recorded event.
    pub random_state: u64,
    /// Lifecycle state.
    pub result: RunResult,
    /// When the run reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Last floor reached (floor of death for defeated runs).
    pub final_floor: u16,
    /// Accumulated experience.
    pub total_exp: u64,
    /// Accumulated gold.
    pub total_gold: u64,
    /// Gold earned from auto-sold drops.
    pub auto_sell_gold: u64,
    /// Daily super-rare gate.
    pub super_rare: SuperRareState,
    /// Item ids encountered this run.
    pub dropped_item_ids: BTreeSet<u16>,
    /// Number of events recorded.
    pub event_count: u32,
}

/// One stored floor event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationEventRecord {
    /// Position within the run, starting at 0.
    pub sequence: u32,
    /// Floor the event happened on.
    pub floor: u16,
    /// Encounter kind.
    pub kind: EncounterKind,
    /// Battle result code, present only for combats with a battle log.
    pub battle_result: Option<u8>,
    /// Experience earned.
    pub exp: u64,
    /// Gold earned.
    pub gold: u64,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
    /// Items dropped, in drop order.
    pub drops: Vec<ItemStack>,
    /// Attached battle log, if any.
    pub battle_log_id: Option<BattleLogId>,
}

/// Stored battle log row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleLogRecord {
    /// Battle log id.
    pub id: BattleLogId,
    /// Enemy master-data id.
    pub enemy_id: u16,
    /// Enemy display name at the time of battle.
    pub enemy_name: String,
    /// Battle result code.
    pub result: u8,
    /// Turns fought.
    pub turns: u8,
    /// When the battle was resolved.
    pub timestamp: DateTime<Utc>,
    /// Encoded battle log.
    #[serde(skip)]
    pub log_data: Vec<u8>,
}

impl BattleLogRecord {
    /// Decode the attached blob.
    pub fn decode_log(&self) -> Result<BattleLog, CodecError> {
        codec::decode(&self.log_data)
    }
}

/// Run plus, for running runs only, the full event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationSummary {
    /// Run state.
    pub run: ExplorationRunRecord,
    /// Event log; `None` for finished runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<ExplorationEventRecord>>,
}

/// Full detail of one run for the history viewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationSnapshot {
    /// Run state.
    pub run: ExplorationRunRecord,
    /// All events in order.
    pub events: Vec<ExplorationEventRecord>,
    /// Items liquidated at finalization.
    pub auto_sold_items: Vec<ItemStack>,
}

/// Everything the simulator needs to continue an interrupted run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationResumeSnapshot {
    /// Run being resumed.
    pub run_id: RunIdentifier,
    /// Dungeon master-data id.
    pub dungeon_id: u16,
    /// Floor at which the run completes.
    pub target_floor: u16,
    /// Difficulty tier.
    pub difficulty: u8,
    /// RNG state to continue from.
    pub random_state: u64,
    /// Daily super-rare gate.
    pub super_rare: SuperRareState,
    /// Item ids encountered so far.
    pub dropped_item_ids: BTreeSet<u16>,
    /// Number of events recorded so far.
    pub event_count: u32,
    /// Current HP per character; empty means "everyone at max HP".
    #[serde(rename = "restoredPartyHPByCharacterId")]
    pub restored_party_hp_by_character_id: BTreeMap<u8, u32>,
}

/// Display-name resolution provided by the master-data collaborator.
pub trait MasterDataLookup {
    /// Dungeon display name.
    fn dungeon_name(&self, dungeon_id: u16) -> Option<String>;
    /// Enemy display name.
    fn enemy_name(&self, enemy_id: u16) -> Option<String>;
    /// Scripted event display name.
    fn scripted_event_name(&self, event_id: u16) -> Option<String>;
    /// Item display name.
    fn item_name(&self, item_id: u16) -> Option<String>;
    /// Title display name.
    fn title_name(&self, title_id: u8) -> Option<String>;
}

/// Display-ready drop line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedDrop {
    /// Item display name.
    pub item_name: String,
    /// Title names (super-rare first), absent titles omitted.
    pub titles: Vec<String>,
    /// Number of items.
    pub quantity: u32,
}

/// Display-ready encounter line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEncounter {
    /// Floor.
    pub floor: u16,
    /// Encounter kind.
    pub kind: EncounterKind,
    /// Enemy or scripted-event display name.
    pub subject_name: Option<String>,
    /// Battle result code.
    pub battle_result: Option<u8>,
    /// Experience earned.
    pub exp: u64,
    /// Gold earned.
    pub gold: u64,
    /// Drops.
    pub drops: Vec<CachedDrop>,
    /// Battle log to fetch for detail.
    pub battle_log_id: Option<BattleLogId>,
}

/// Read model consumed by the UI caching layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedExploration {
    /// Run identifier.
    pub id: RunIdentifier,
    /// Dungeon display name.
    pub dungeon_name: String,
    /// Lifecycle state.
    pub status: RunResult,
    /// Last floor reached.
    pub floor: u16,
    /// Target floor.
    pub target_floor: u16,
    /// Accumulated experience.
    pub total_exp: u64,
    /// Accumulated gold.
    pub total_gold: u64,
    /// Gold from auto-sold drops.
    pub auto_sell_gold: u64,
    /// Encounter logs (empty for finished summaries).
    pub encounters: Vec<CachedEncounter>,
}

impl CachedExploration {
    /// Resolve a summary against master data.
    pub fn from_summary(summary: &ExplorationSummary, master: &dyn MasterDataLookup) -> Self {
        Self::build(&summary.run, summary.events.as_deref().unwrap_or(&[]), master)
    }

    /// Resolve a full snapshot against master data.
    pub fn from_snapshot(snapshot: &ExplorationSnapshot, master: &dyn MasterDataLookup) -> Self {
        Self::build(&snapshot.run, &snapshot.events, master)
    }

    fn build(
        run: &ExplorationRunRecord,
        events: &[ExplorationEventRecord],
        master: &dyn MasterDataLookup,
    ) -> Self {
        let dungeon_name = master
            .dungeon_name(run.dungeon_id)
            .unwrap_or_else(|| format!("Dungeon #{}", run.dungeon_id));

        let encounters = events
            .iter()
            .map(|event| CachedEncounter {
                floor: event.floor,
                kind: event.kind,
                subject_name: match event.kind {
                    EncounterKind::Nothing => None,
                    EncounterKind::Combat { enemy_id } => master.enemy_name(enemy_id),
                    EncounterKind::Scripted { event_id } => master.scripted_event_name(event_id),
                },
                battle_result: event.battle_result,
                exp: event.exp,
                gold: event.gold,
                drops: event.drops.iter().map(|d| cached_drop(d, master)).collect(),
                battle_log_id: event.battle_log_id.clone(),
            })
            .collect();

        Self {
            id: run.id,
            dungeon_name,
            status: run.result,
            floor: run.final_floor,
            target_floor: run.target_floor,
            total_exp: run.total_exp,
            total_gold: run.total_gold,
            auto_sell_gold: run.auto_sell_gold,
            encounters,
        }
    }
}

fn cached_drop(stack: &ItemStack, master: &dyn MasterDataLookup) -> CachedDrop {
    let titles = [stack.super_rare_title_id, stack.normal_title_id]
        .into_iter()
        .filter(|id| *id != 0)
        .filter_map(|id| master.title_name(id))
        .collect();
    CachedDrop {
        item_name: master
            .item_name(stack.item_id)
            .unwrap_or_else(|| format!("Item #{}", stack.item_id)),
        titles,
        quantity: stack.quantity,
    }
}
