//! Binary battle log codec.
//!
//! One blob holds one combat. Layout, all integers little-endian:
//!
//! ```text
//! version:u8 (= 1)
//! outcome:u8  turns:u8
//! hpCount:u16  { actorIndex:u16 hp:u32 } × hpCount        ascending actorIndex
//! entryCount:u16
//!   { turn:u8
//!     [p:u8 actor:u16]
//!     declarationKind:u8 [p:u8 skillIndex:u16] [p:u8 extra:u16]
//!     effectCount:u8
//!       { kind:u8 [p:u8 target:u16] [p:u8 value:u32] [p:u8 statusId:u16] [p:u8 extra:u32] } × effectCount
//!   } × entryCount
//! playerCount:u8  enemyCount:u8
//!   { actorIndex:u16 characterId:u8 nameLen:u8 name:[u8] avatarIndex:u16 level:u16 maxHP:u32 }
//! ```
//!
//! `[p:u8 x]` is a presence byte (0/1) followed by `x` only when present.
//!
//! Participant fields `characterId`, `avatarIndex` and `level` use 0 on the
//! wire to mean "absent"; in memory they are `Option<NonZero*>` so a real
//! zero can never be confused with absence.
//!
//! Only version 1 is accepted. Blobs without a version byte, or with a
//! different one, fail with [`CodecError::UnsupportedVersion`] rather than
//! being decoded under a guessed layout.

mod item_ids;
mod reader;

pub use item_ids::{decode_item_ids, encode_item_ids};

use std::collections::BTreeMap;
use std::num::{NonZeroU8, NonZeroU16};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use reader::ByteReader;

/// Current wire revision.
pub const FORMAT_VERSION: u8 = 1;

/// Effect kinds the resume replay interprets. Any other value is carried
/// through the codec untouched.
pub mod effect_kind {
    /// Subtract `value` from `target`'s HP.
    pub const DAMAGE: u8 = 0;
    /// Add `value` to `target`'s HP.
    pub const HEAL: u8 = 1;
    /// Set `target`'s HP to `value`.
    pub const SET_HP: u8 = 2;
    /// Status ailment applied (`status_id`).
    pub const STATUS_APPLY: u8 = 3;
    /// Status ailment removed (`status_id`).
    pub const STATUS_CLEAR: u8 = 4;
    /// Attack missed or was evaded.
    pub const MISS: u8 = 5;
}

/// Battle outcome codes.
pub mod outcome {
    /// Party won.
    pub const VICTORY: u8 = 0;
    /// Party was wiped out.
    pub const DEFEAT: u8 = 1;
    /// Party fled.
    pub const RETREAT: u8 = 2;
}

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes do not describe a valid log (truncated, bad flag, bad UTF-8,
    /// trailing data).
    #[error("malformed battle log at byte {offset}: {reason}")]
    MalformedData {
        /// Byte offset where decoding stopped.
        offset: usize,
        /// What was being read.
        reason: &'static str,
    },

    /// Leading version byte is not one this build understands.
    #[error("unsupported battle log version {0}")]
    UnsupportedVersion(u8),

    /// A collection does not fit its length prefix.
    #[error("battle log too large: {0}")]
    LogTooLarge(&'static str),
}

/// Decoded content of one combat.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleLog {
    /// HP of each actor at the start of battle.
    #[serde(rename = "initialHP")]
    pub initial_hp: BTreeMap<u16, u32>,
    /// Resolved actions in order.
    pub entries: Vec<ActionEntry>,
    /// Outcome code (see [`outcome`]).
    pub outcome: u8,
    /// Turns fought.
    pub turns: u8,
    /// Player-side participants.
    pub player_snapshots: Vec<ParticipantSnapshot>,
    /// Enemy-side participants.
    pub enemy_snapshots: Vec<ParticipantSnapshot>,
}

/// One resolved action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntry {
    /// Turn number.
    pub turn: u8,
    /// Acting actor, absent for environmental effects.
    pub actor: Option<u16>,
    /// What the actor declared.
    pub declaration: Declaration,
    /// Resolved effects.
    pub effects: Vec<Effect>,
}

/// Declared action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    /// Declaration kind (attack, skill, item, defend, ...).
    pub kind: u8,
    /// Skill slot for skill declarations.
    pub skill_index: Option<u16>,
    /// Kind-specific extra operand.
    pub extra: Option<u16>,
}

/// One resolved effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    /// Effect kind (see [`effect_kind`]).
    pub kind: u8,
    /// Affected actor.
    pub target: Option<u16>,
    /// Magnitude.
    pub value: Option<u32>,
    /// Status ailment id.
    pub status_id: Option<u16>,
    /// Kind-specific extra operand.
    pub extra: Option<u32>,
}

/// Participant roster entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSnapshot {
    /// Actor index used by entries and the HP table.
    pub actor_index: u16,
    /// Persistent player character; `None` for enemies and guests.
    pub character_id: Option<NonZeroU8>,
    /// Display name at the time of battle.
    pub name: String,
    /// Avatar index.
    pub avatar_index: Option<NonZeroU16>,
    /// Level at the time of battle.
    pub level: Option<NonZeroU16>,
    /// Maximum HP.
    #[serde(rename = "maxHP")]
    pub max_hp: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a battle log.
///
/// Fails only when a collection exceeds its length prefix.
pub fn encode(log: &BattleLog) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(64 + log.entries.len() * 16);
    out.push(FORMAT_VERSION);
    out.push(log.outcome);
    out.push(log.turns);

    put_u16(&mut out, len_u16(log.initial_hp.len(), "initial HP table")?);
    for (actor, hp) in &log.initial_hp {
        put_u16(&mut out, *actor);
        put_u32(&mut out, *hp);
    }

    put_u16(&mut out, len_u16(log.entries.len(), "action entries")?);
    for entry in &log.entries {
        out.push(entry.turn);
        put_opt_u16(&mut out, entry.actor);
        out.push(entry.declaration.kind);
        put_opt_u16(&mut out, entry.declaration.skill_index);
        put_opt_u16(&mut out, entry.declaration.extra);
        out.push(len_u8(entry.effects.len(), "effects per entry")?);
        for effect in &entry.effects {
            out.push(effect.kind);
            put_opt_u16(&mut out, effect.target);
            put_opt_u32(&mut out, effect.value);
            put_opt_u16(&mut out, effect.status_id);
            put_opt_u32(&mut out, effect.extra);
        }
    }

    out.push(len_u8(log.player_snapshots.len(), "player snapshots")?);
    out.push(len_u8(log.enemy_snapshots.len(), "enemy snapshots")?);
    for participant in log.player_snapshots.iter().chain(&log.enemy_snapshots) {
        put_u16(&mut out, participant.actor_index);
        out.push(participant.character_id.map_or(0, NonZeroU8::get));
        let name = participant.name.as_bytes();
        out.push(len_u8(name.len(), "participant name")?);
        out.extend_from_slice(name);
        put_u16(&mut out, participant.avatar_index.map_or(0, NonZeroU16::get));
        put_u16(&mut out, participant.level.map_or(0, NonZeroU16::get));
        put_u32(&mut out, participant.max_hp);
    }

    Ok(out)
}

fn len_u8(len: usize, what: &'static str) -> Result<u8, CodecError> {
    u8::try_from(len).map_err(|_| CodecError::LogTooLarge(what))
}

fn len_u16(len: usize, what: &'static str) -> Result<u16, CodecError> {
    u16::try_from(len).map_err(|_| CodecError::LogTooLarge(what))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_opt_u16(out: &mut Vec<u8>, v: Option<u16>) {
    match v {
        Some(v) => {
            out.push(1);
            put_u16(out, v);
        }
        None => out.push(0),
    }
}

fn put_opt_u32(out: &mut Vec<u8>, v: Option<u32>) {
    match v {
        Some(v) => {
            out.push(1);
            put_u32(out, v);
        }
        None => out.push(0),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a battle log.
///
/// Every length is checked against the remaining input before anything is
/// allocated or read, so corrupt blobs fail with
/// [`CodecError::MalformedData`] instead of over-reading.
pub fn decode(bytes: &[u8]) -> Result<BattleLog, CodecError> {
    let mut r = ByteReader::new(bytes);

    let version = r.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let outcome = r.u8("outcome")?;
    let turns = r.u8("turns")?;

    let hp_count = usize::from(r.u16("initial HP count")?);
    if hp_count * 6 > r.remaining() {
        return Err(r.malformed("initial HP count exceeds input"));
    }
    let mut initial_hp = BTreeMap::new();
    let mut previous: Option<u16> = None;
    for _ in 0..hp_count {
        let actor = r.u16("initial HP actor")?;
        if previous.is_some_and(|p| p >= actor) {
            return Err(r.malformed("initial HP actors not strictly ascending"));
        }
        previous = Some(actor);
        let hp = r.u32("initial HP value")?;
        let _ = initial_hp.insert(actor, hp);
    }

    let entry_count = usize::from(r.u16("entry count")?);
    // Smallest possible entry: turn + flag + kind + flag + flag + effectCount.
    if entry_count * 6 > r.remaining() {
        return Err(r.malformed("entry count exceeds input"));
    }
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        entries.push(decode_entry(&mut r)?);
    }

    let player_count = usize::from(r.u8("player count")?);
    let enemy_count = usize::from(r.u8("enemy count")?);
    // Smallest possible participant: 2 + 1 + 1 + 2 + 2 + 4.
    if (player_count + enemy_count) * 12 > r.remaining() {
        return Err(r.malformed("participant count exceeds input"));
    }
    let mut player_snapshots = Vec::with_capacity(player_count);
    for _ in 0..player_count {
        player_snapshots.push(decode_participant(&mut r)?);
    }
    let mut enemy_snapshots = Vec::with_capacity(enemy_count);
    for _ in 0..enemy_count {
        enemy_snapshots.push(decode_participant(&mut r)?);
    }

    if r.remaining() != 0 {
        return Err(r.malformed("trailing bytes after participants"));
    }

    Ok(BattleLog {
        initial_hp,
        entries,
        outcome,
        turns,
        player_snapshots,
        enemy_snapshots,
    })
}

fn decode_entry(r: &mut ByteReader<'_>) -> Result<ActionEntry, CodecError> {
    let turn = r.u8("entry turn")?;
    let actor = r.opt_u16("entry actor")?;
    let declaration = Declaration {
        kind: r.u8("declaration kind")?,
        skill_index: r.opt_u16("declaration skill index")?,
        extra: r.opt_u16("declaration extra")?,
    };
    let effect_count = usize::from(r.u8("effect count")?);
    // Smallest possible effect: kind + four absent flags.
    if effect_count * 5 > r.remaining() {
        return Err(r.malformed("effect count exceeds input"));
    }
    let mut effects = Vec::with_capacity(effect_count);
    for _ in 0..effect_count {
        effects.push(Effect {
            kind: r.u8("effect kind")?,
            target: r.opt_u16("effect target")?,
            value: r.opt_u32("effect value")?,
            status_id: r.opt_u16("effect status")?,
            extra: r.opt_u32("effect extra")?,
        });
    }
    Ok(ActionEntry {
        turn,
        actor,
        declaration,
        effects,
    })
}

fn decode_participant(r: &mut ByteReader<'_>) -> Result<ParticipantSnapshot, CodecError> {
    let actor_index = r.u16("participant actor")?;
    let character_id = NonZeroU8::new(r.u8("participant character")?);
    let name_len = usize::from(r.u8("participant name length")?);
    let name_offset = r.offset();
    let name_bytes = r.take(name_len, "participant name")?;
    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| CodecError::MalformedData {
            offset: name_offset,
            reason: "participant name is not UTF-8",
        })?
        .to_owned();
    Ok(ParticipantSnapshot {
        actor_index,
        character_id,
        name,
        avatar_index: NonZeroU16::new(r.u16("participant avatar")?),
        level: NonZeroU16::new(r.u16("participant level")?),
        max_hp: r.u32("participant max HP")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
