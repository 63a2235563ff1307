//! Domain types shared by the store, session, resume and worker layers.
//!
//! Write-side inputs ([`BeginRunParams`], [`ExplorationEventLogEntry`],
//! [`BattleLogArchive`]) are produced by the external simulator. Read-side
//! views live in [`read_model`].

pub mod read_model;

pub use read_model::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::BattleLog;
use crate::errors::{LedgerError, Result};

/// Natural key of a run: one party can start at most one run per instant.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdentifier {
    /// Party that owns the run.
    pub party_id: u8,
    /// Instant the run started.
    pub started_at: DateTime<Utc>,
}

impl RunIdentifier {
    /// Build an identifier.
    pub fn new(party_id: u8, started_at: DateTime<Utc>) -> Self {
        Self {
            party_id,
            started_at,
        }
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "party {} @ {}",
            self.party_id,
            format_timestamp(&self.started_at)
        )
    }
}

/// Canonical storage form for timestamps: fixed-width RFC 3339 with
/// nanoseconds, so text ordering equals chronological ordering and the
/// composite run key compares exactly.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Lifecycle state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// Still in progress (or orphaned by a crash).
    Running,
    /// Reached the target floor.
    Completed,
    /// Party was wiped out.
    Defeated,
    /// Abandoned by the player.
    Cancelled,
}

impl RunResult {
    /// Whether no further events may be appended.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Defeated => write!(f, "defeated"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunResult {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "defeated" => Ok(Self::Defeated),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run result: {other}")),
        }
    }
}

/// What happened on one floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EncounterKind {
    /// Empty floor.
    Nothing,
    /// Fight against one enemy group.
    #[serde(rename_all = "camelCase")]
    Combat {
        /// Enemy master-data id.
        enemy_id: u16,
    },
    /// Scripted (non-combat) event.
    #[serde(rename_all = "camelCase")]
    Scripted {
        /// Scripted event master-data id.
        event_id: u16,
    },
}

impl EncounterKind {
    /// Storage tag for the `events.kind` column.
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Combat { .. } => "combat",
            Self::Scripted { .. } => "scripted",
        }
    }

    /// Enemy or scripted-event id stored alongside the tag.
    pub(crate) fn subject_id(self) -> Option<u16> {
        match self {
            Self::Nothing => None,
            Self::Combat { enemy_id } => Some(enemy_id),
            Self::Scripted { event_id } => Some(event_id),
        }
    }

    /// Inverse of [`tag`](Self::tag) + [`subject_id`](Self::subject_id).
    pub(crate) fn from_parts(tag: &str, subject_id: Option<u16>) -> Option<Self> {
        match (tag, subject_id) {
            ("nothing", _) => Some(Self::Nothing),
            ("combat", Some(enemy_id)) => Some(Self::Combat { enemy_id }),
            ("scripted", Some(event_id)) => Some(Self::Scripted { event_id }),
            _ => None,
        }
    }
}

/// A quantity of one item variant, used for both drops and auto-sold items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStack {
    /// Item master-data id.
    pub item_id: u16,
    /// Super-rare title applied to the item (0 = none).
    pub super_rare_title_id: u8,
    /// Normal title applied to the item (0 = none).
    pub normal_title_id: u8,
    /// Number of items.
    pub quantity: u32,
}

/// Daily-unique super-rare drop gate, checkpointed with every event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperRareState {
    /// JST calendar day the gate refers to.
    pub jst_date: Option<NaiveDate>,
    /// Whether the daily super-rare has already dropped on that day.
    pub has_triggered: bool,
}

/// Terminal state recorded by `finalize_run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EndState {
    /// Target floor reached.
    Completed,
    /// Party wiped out on `floor`.
    Defeated {
        /// Floor of death.
        floor: u16,
    },
}

impl EndState {
    pub(crate) fn result(self) -> RunResult {
        match self {
            Self::Completed => RunResult::Completed,
            Self::Defeated { .. } => RunResult::Defeated,
        }
    }
}

/// Parameters for starting a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRunParams {
    /// Party starting the run.
    pub party_id: u8,
    /// Dungeon master-data id.
    pub dungeon_id: u16,
    /// Difficulty tier.
    pub difficulty: u8,
    /// Floor at which the run completes.
    pub target_floor: u16,
    /// Start instant (half of the run identifier).
    pub started_at: DateTime<Utc>,
    /// Initial RNG seed handed to the simulator.
    pub seed: u64,
}

impl BeginRunParams {
    /// Build parameters from collaborator snapshots, validating the target
    /// floor against the dungeon definition.
    pub fn for_party(
        party: &PartySnapshot,
        dungeon: &DungeonDefinition,
        difficulty: u8,
        target_floor: u16,
        started_at: DateTime<Utc>,
        seed: u64,
    ) -> Result<Self> {
        if party.member_character_ids.is_empty() {
            return Err(LedgerError::InvalidArgument(format!(
                "party {} has no members",
                party.id
            )));
        }
        if target_floor == 0 || target_floor > dungeon.floor_count {
            return Err(LedgerError::InvalidArgument(format!(
                "target floor {target_floor} outside 1..={} for dungeon {}",
                dungeon.floor_count, dungeon.id
            )));
        }
        Ok(Self {
            party_id: party.id,
            dungeon_id: dungeon.id,
            difficulty,
            target_floor,
            started_at,
            seed,
        })
    }

    /// Identifier the run will be stored under.
    pub fn identifier(&self) -> RunIdentifier {
        RunIdentifier::new(self.party_id, self.started_at)
    }
}

/// One resolved floor outcome, as produced by the simulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationEventLogEntry {
    /// Floor the event happened on.
    pub floor: u16,
    /// Encounter kind.
    pub kind: EncounterKind,
    /// Experience earned.
    pub exp: u64,
    /// Gold earned.
    pub gold: u64,
    /// Items dropped.
    pub drops: Vec<ItemStack>,
}

/// Detailed combat record accompanying a combat event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleLogArchive {
    /// Enemy master-data id.
    pub enemy_id: u16,
    /// Enemy display name at the time of battle.
    pub enemy_name: String,
    /// Battle result code (mirrors `log.outcome`).
    pub result: u8,
    /// Number of turns fought.
    pub turns: u8,
    /// When the battle was resolved.
    pub timestamp: DateTime<Utc>,
    /// Decoded battle content; encoded on append.
    pub log: BattleLog,
}

/// Party roster as seen by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    /// Party id.
    pub id: u8,
    /// Persistent character ids in roster order.
    pub member_character_ids: Vec<u8>,
}

/// Dungeon definition fields the ledger needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DungeonDefinition {
    /// Dungeon id.
    pub id: u16,
    /// Number of floors.
    pub floor_count: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn run_result_roundtrip() {
        for r in [
            RunResult::Running,
            RunResult::Completed,
            RunResult::Defeated,
            RunResult::Cancelled,
        ] {
            assert_eq!(r.to_string().parse::<RunResult>().unwrap(), r);
        }
        assert!("paused".parse::<RunResult>().is_err());
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunResult::Running.is_terminal());
        assert!(RunResult::Cancelled.is_terminal());
        assert!(RunResult::Defeated.is_terminal());
    }

    #[test]
    fn encounter_kind_parts_roundtrip() {
        for kind in [
            EncounterKind::Nothing,
            EncounterKind::Combat { enemy_id: 40 },
            EncounterKind::Scripted { event_id: 2 },
        ] {
            assert_eq!(
                EncounterKind::from_parts(kind.tag(), kind.subject_id()),
                Some(kind)
            );
        }
        assert_eq!(EncounterKind::from_parts("combat", None), None);
        assert_eq!(EncounterKind::from_parts("ambush", Some(1)), None);
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = format_timestamp(&at());
        let b = format_timestamp(&(at() + chrono::Duration::nanoseconds(1)));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn for_party_validates_target_floor() {
        let party = PartySnapshot {
            id: 2,
            member_character_ids: vec![1, 4],
        };
        let dungeon = DungeonDefinition {
            id: 12,
            floor_count: 10,
        };
        let ok = BeginRunParams::for_party(&party, &dungeon, 1, 10, at(), 5).unwrap();
        assert_eq!(ok.identifier(), RunIdentifier::new(2, at()));

        assert_matches!(
            BeginRunParams::for_party(&party, &dungeon, 1, 11, at(), 5),
            Err(LedgerError::InvalidArgument(_))
        );
        assert_matches!(
            BeginRunParams::for_party(&party, &dungeon, 1, 0, at(), 5),
            Err(LedgerError::InvalidArgument(_))
        );
    }

    #[test]
    fn for_party_rejects_empty_roster() {
        let party = PartySnapshot {
            id: 2,
            member_character_ids: vec![],
        };
        let dungeon = DungeonDefinition {
            id: 12,
            floor_count: 10,
        };
        assert_matches!(
            BeginRunParams::for_party(&party, &dungeon, 1, 5, at(), 5),
            Err(LedgerError::InvalidArgument(_))
        );
    }
}
