//! Party HP reconstruction for interrupted runs.
//!
//! HP is never persisted directly. It is recovered by replaying the HP
//! effects of the most recent battle log on top of that log's initial HP
//! table. An empty result means "everyone at max HP".

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::codec::{BattleLog, effect_kind};
use crate::types::BattleLogRecord;

/// Replay `log` and return each player character's final HP.
///
/// - Damage subtracts, Heal adds, SetHp assigns; other kinds are ignored,
///   as are effects with no target or no value.
/// - An actor missing from the initial HP table starts at its max HP.
/// - Results are clamped to `0..=max_hp`. Snapshots without a character id
///   are not reported.
pub fn replay_party_hp(log: &BattleLog) -> BTreeMap<u8, u32> {
    let mut hp: BTreeMap<u16, i64> = log
        .player_snapshots
        .iter()
        .chain(&log.enemy_snapshots)
        .map(|p| (p.actor_index, i64::from(p.max_hp)))
        .collect();
    for (actor, value) in &log.initial_hp {
        let _ = hp.insert(*actor, i64::from(*value));
    }

    for effect in log.entries.iter().flat_map(|entry| &entry.effects) {
        let (Some(target), Some(value)) = (effect.target, effect.value) else {
            continue;
        };
        let value = i64::from(value);
        match effect.kind {
            effect_kind::DAMAGE => {
                let current = hp.entry(target).or_insert(0);
                *current = current.saturating_sub(value);
            }
            effect_kind::HEAL => {
                let current = hp.entry(target).or_insert(0);
                *current = current.saturating_add(value);
            }
            effect_kind::SET_HP => {
                let _ = hp.insert(target, value);
            }
            _ => {}
        }
    }

    log.player_snapshots
        .iter()
        .filter_map(|player| {
            let character_id = player.character_id?.get();
            let current = hp
                .get(&player.actor_index)
                .copied()
                .unwrap_or(i64::from(player.max_hp));
            let clamped = current.clamp(0, i64::from(player.max_hp)) as u32;
            Some((character_id, clamped))
        })
        .collect()
}

/// HP to resume with, given the latest stored battle log of a run.
///
/// Missing or undecodable logs yield an empty map; decode failures are
/// logged, not returned.
pub(crate) fn restore_party_hp(latest: Option<&BattleLogRecord>) -> BTreeMap<u8, u32> {
    let Some(record) = latest else {
        debug!("no battle log recorded, party resumes at max HP");
        return BTreeMap::new();
    };
    match record.decode_log() {
        Ok(log) => replay_party_hp(&log),
        Err(error) => {
            warn!(
                battle_log_id = %record.id,
                %error,
                "failed to decode battle log for resume, party resumes at max HP"
            );
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::{NonZeroU8, NonZeroU16};

    use super::*;
    use crate::codec::{ActionEntry, Declaration, Effect, ParticipantSnapshot};
    use crate::ids::BattleLogId;
    use chrono::{TimeZone, Utc};

    fn player(actor_index: u16, character_id: u8, max_hp: u32) -> ParticipantSnapshot {
        ParticipantSnapshot {
            actor_index,
            character_id: NonZeroU8::new(character_id),
            name: format!("P{actor_index}"),
            avatar_index: None,
            level: NonZeroU16::new(1),
            max_hp,
        }
    }

    fn effect(kind: u8, target: u16, value: u32) -> Effect {
        Effect {
            kind,
            target: Some(target),
            value: Some(value),
            status_id: None,
            extra: None,
        }
    }

    fn entry(effects: Vec<Effect>) -> ActionEntry {
        ActionEntry {
            turn: 1,
            actor: Some(10),
            declaration: Declaration {
                kind: 0,
                skill_index: None,
                extra: None,
            },
            effects,
        }
    }

    fn log(initial: &[(u16, u32)], players: Vec<ParticipantSnapshot>, effects: Vec<Effect>) -> BattleLog {
        BattleLog {
            initial_hp: initial.iter().copied().collect(),
            entries: vec![entry(effects)],
            outcome: 0,
            turns: 1,
            player_snapshots: players,
            enemy_snapshots: vec![],
        }
    }

    #[test]
    fn damage_subtracts() {
        let log = log(
            &[(0, 100)],
            vec![player(0, 1, 100)],
            vec![effect(effect_kind::DAMAGE, 0, 30)],
        );
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(1, 70)]));
    }

    #[test]
    fn set_hp_overrides_earlier_deltas() {
        let log = log(
            &[(0, 100)],
            vec![player(0, 1, 100)],
            vec![
                effect(effect_kind::DAMAGE, 0, 30),
                effect(effect_kind::HEAL, 0, 10),
                effect(effect_kind::SET_HP, 0, 55),
                effect(effect_kind::DAMAGE, 0, 5),
            ],
        );
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(1, 50)]));
    }

    #[test]
    fn clamps_both_ends() {
        let log = log(
            &[(0, 10), (1, 90)],
            vec![player(0, 1, 100), player(1, 2, 100)],
            vec![
                effect(effect_kind::DAMAGE, 0, u32::MAX),
                effect(effect_kind::HEAL, 1, 500),
            ],
        );
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(1, 0), (2, 100)]));
    }

    #[test]
    fn other_kinds_and_incomplete_effects_are_ignored() {
        let mut no_value = effect(effect_kind::DAMAGE, 0, 0);
        no_value.value = None;
        let mut no_target = effect(effect_kind::DAMAGE, 0, 10);
        no_target.target = None;
        let log = log(
            &[(0, 40)],
            vec![player(0, 1, 50)],
            vec![effect(effect_kind::STATUS_APPLY, 0, 99), no_value, no_target],
        );
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(1, 40)]));
    }

    #[test]
    fn missing_initial_hp_starts_at_max_and_guests_are_skipped() {
        let log = log(
            &[],
            vec![player(0, 1, 60), player(1, 0, 80)],
            vec![effect(effect_kind::DAMAGE, 0, 15), effect(effect_kind::DAMAGE, 1, 15)],
        );
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(1, 45)]));
    }

    #[test]
    fn replay_is_deterministic() {
        let log = crate::codec::tests::sample_log();
        assert_eq!(replay_party_hp(&log), replay_party_hp(&log));
        assert_eq!(replay_party_hp(&log), BTreeMap::from([(3, 30)]));
    }

    #[test]
    fn undecodable_record_means_full_hp() {
        let record = BattleLogRecord {
            id: BattleLogId::new(),
            enemy_id: 1,
            enemy_name: "Slime".into(),
            result: 0,
            turns: 1,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            log_data: vec![9, 9, 9],
        };
        assert!(restore_party_hp(Some(&record)).is_empty());
        assert!(restore_party_hp(None).is_empty());
    }
}
