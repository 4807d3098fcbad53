// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Property tests: at every committed sequence the successor chain visits
//! exactly the live keys in ascending order, and point reads resolve the
//! largest version at or below the requested sequence.

use proptest::prelude::*;
use quill_backend::{BackendInterface, MockBackend};
use quill_cache::LedgerCache;
use quill_types::{Hash256, LedgerHeader, LedgerKey, Sequence, FIRST_KEY, LAST_KEY};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Write(u8, u8),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..24, 1u8..=255).prop_map(|(key, value)| Op::Write(key, value)),
        (0u8..24).prop_map(Op::Delete),
    ]
}

fn ledgers_strategy() -> impl Strategy<Value = Vec<Vec<Op>>> {
    prop::collection::vec(prop::collection::vec(op_strategy(), 0..6), 1..8)
}

fn header(sequence: Sequence) -> LedgerHeader {
    LedgerHeader {
        sequence,
        hash: Hash256::from(sequence as u64),
        parent_hash: Hash256::from(sequence as u64 - 1),
        ..LedgerHeader::default()
    }
}

async fn run_scenario(ledgers: Vec<Vec<Op>>) {
    let store = Arc::new(MockBackend::new());
    let facade = BackendInterface::new(store.clone(), Arc::new(LedgerCache::new()));

    let mut model: BTreeMap<LedgerKey, Vec<u8>> = BTreeMap::new();
    let mut snapshots: Vec<(Sequence, BTreeMap<LedgerKey, Vec<u8>>)> = Vec::new();
    let first_sequence: Sequence = 100;

    for (offset, ops) in ledgers.iter().enumerate() {
        let sequence = first_sequence + offset as Sequence;
        facade.start_writes();
        for op in ops {
            match op {
                Op::Write(key, value) => {
                    let key = LedgerKey::from(*key as u64);
                    let blob = vec![*value, sequence as u8];
                    model.insert(key, blob.clone());
                    facade.write_ledger_object(key, sequence, blob);
                },
                Op::Delete(key) => {
                    let key = LedgerKey::from(*key as u64);
                    // a delete of an absent key is not a valid diff entry
                    if model.remove(&key).is_some() {
                        facade.write_ledger_object(key, sequence, Vec::new());
                    }
                },
            }
        }
        let mut previous = FIRST_KEY;
        for key in model.keys() {
            facade.write_successor(previous, sequence, *key);
            previous = *key;
        }
        facade.write_successor(previous, sequence, LAST_KEY);
        facade.write_ledger(header(sequence));
        assert!(facade.finish_writes(sequence).await.unwrap());
        snapshots.push((sequence, model.clone()));
    }

    for (sequence, snapshot) in &snapshots {
        // walk the chain and require exactly the live keys, in order
        let mut walked = Vec::new();
        let mut at = FIRST_KEY;
        while let Some(object) = facade.fetch_successor(&at, *sequence).await.unwrap() {
            assert_eq!(
                snapshot.get(&object.key),
                Some(&object.blob),
                "blob mismatch at seq {}",
                sequence
            );
            walked.push(object.key);
            at = object.key;
        }
        let expected: Vec<LedgerKey> = snapshot.keys().copied().collect();
        assert_eq!(walked, expected, "chain mismatch at seq {}", sequence);

        // the persisted successor table resolves to the same chain
        let mut table_walk = Vec::new();
        let mut at = FIRST_KEY;
        while let Some(next) = store.successor_table_resolve(&at, *sequence) {
            if next == LAST_KEY {
                break;
            }
            table_walk.push(next);
            at = next;
        }
        assert_eq!(table_walk, expected, "table mismatch at seq {}", sequence);

        // every key resolves to its modeled value, live or absent
        for key_byte in 0u8..24 {
            let key = LedgerKey::from(key_byte as u64);
            let fetched = facade.fetch_ledger_object(&key, *sequence).await.unwrap();
            assert_eq!(
                fetched.as_ref(),
                snapshot.get(&key),
                "object mismatch for key {} at seq {}",
                key_byte,
                sequence
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn successor_chain_is_total_and_ordered(ledgers in ledgers_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_scenario(ledgers));
    }
}
