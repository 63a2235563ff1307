//! Property tests over sequences of session writes.

use std::collections::BTreeSet;

use chrono::{Duration, TimeZone, Utc};
use expedition_ledger::{
    BeginRunParams, EncounterKind, ExplorationEventLogEntry, ExplorationStore, LedgerError,
    SuperRareState,
};
use proptest::prelude::*;

fn events() -> impl Strategy<Value = Vec<(u16, u64, u64)>> {
    proptest::collection::vec((1u16..50, 0u64..10_000, 0u64..10_000), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn totals_match_appended_events(events in events(), batch in 1usize..4) {
        let store = ExplorationStore::in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).unwrap();
        let id = store
            .begin_run(&BeginRunParams {
                party_id: 1,
                dungeon_id: 1,
                difficulty: 0,
                target_floor: 50,
                started_at: t0,
                seed: 0,
            })
            .unwrap();

        for chunk in events.chunks(batch) {
            let mut session = store.open_session(id);
            for (i, (floor, exp, gold)) in chunk.iter().enumerate() {
                let _ = session
                    .append_event(
                        ExplorationEventLogEntry {
                            floor: *floor,
                            kind: EncounterKind::Nothing,
                            exp: *exp,
                            gold: *gold,
                            drops: vec![],
                        },
                        None,
                        t0 + Duration::seconds(i as i64),
                        0,
                        SuperRareState::default(),
                        BTreeSet::new(),
                    )
                    .unwrap();
            }
            let _ = session.flush_if_needed(&store).unwrap();
        }

        let snapshot = store.exploration_snapshot(id).unwrap();
        prop_assert_eq!(snapshot.run.total_exp, events.iter().map(|e| e.1).sum::<u64>());
        prop_assert_eq!(snapshot.run.total_gold, events.iter().map(|e| e.2).sum::<u64>());
        prop_assert_eq!(snapshot.run.final_floor, events.last().unwrap().0);
        prop_assert_eq!(snapshot.run.event_count as usize, events.len());
        let floors: Vec<u16> = snapshot.events.iter().map(|e| e.floor).collect();
        let expected: Vec<u16> = events.iter().map(|e| e.0).collect();
        prop_assert_eq!(floors, expected);
    }

    #[test]
    fn at_most_one_running_run_per_party(parties in proptest::collection::vec(0u8..4, 1..20)) {
        let store = ExplorationStore::in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).unwrap();
        for (minute, party_id) in parties.iter().enumerate() {
            let result = store.begin_run(&BeginRunParams {
                party_id: *party_id,
                dungeon_id: 1,
                difficulty: 0,
                target_floor: 1,
                started_at: t0 + Duration::minutes(minute as i64),
                seed: 0,
            });
            let already_running = parties[..minute].contains(party_id);
            match result {
                Ok(_) => prop_assert!(!already_running),
                Err(LedgerError::PartyBusy { .. }) => prop_assert!(already_running),
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
        let running = store.running_summaries().unwrap();
        let distinct: BTreeSet<u8> = running.iter().map(|id| id.party_id).collect();
        prop_assert_eq!(distinct.len(), running.len());
        let expected: BTreeSet<u8> = parties.iter().copied().collect();
        prop_assert_eq!(distinct, expected);
    }
}
