// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::LedgerCache;
use claims::{assert_none, assert_some, assert_some_eq};
use quill_types::{LedgerKey, LedgerObject, ObjectDiff, FIRST_KEY, LAST_KEY};

fn diff(key: u64, blob: &[u8]) -> ObjectDiff {
    ObjectDiff {
        key: LedgerKey::from(key),
        blob: blob.to_vec(),
    }
}

#[test]
fn empty_cache_misses_everything() {
    let cache = LedgerCache::new();
    assert!(!cache.is_full());
    cache.set_full();
    assert!(cache.is_full());
    assert_eq!(cache.size(), 0);
    assert_none!(cache.get(&LedgerKey::from(12u64), 0));
    assert_none!(cache.successor(&FIRST_KEY, 0));
    assert_none!(cache.predecessor(&LAST_KEY, 0));
}

#[test]
fn single_object_lifecycle() {
    let cache = LedgerCache::new();
    cache.set_full();
    let key = LedgerKey::from(42u64);

    // insert
    let mut seq = 1;
    cache.update(vec![diff(42, &[0xcc])], seq, false);
    assert_eq!(cache.size(), 1);
    assert_some_eq!(cache.get(&key, seq), vec![0xcc]);
    // not visible past the latest applied sequence nor before insertion
    assert_none!(cache.get(&key, seq + 1));
    assert_none!(cache.get(&key, seq - 1));
    assert_none!(cache.successor(&key, seq));
    assert_none!(cache.predecessor(&key, seq));
    assert_some_eq!(
        cache.successor(&FIRST_KEY, seq),
        LedgerObject {
            key,
            blob: vec![0xcc]
        }
    );
    assert_some_eq!(
        cache.predecessor(&LAST_KEY, seq),
        LedgerObject {
            key,
            blob: vec![0xcc]
        }
    );

    // modify
    seq += 1;
    cache.update(vec![diff(42, &[0x01])], seq, false);
    assert_eq!(cache.size(), 1);
    assert_some_eq!(cache.get(&key, seq), vec![0x01]);
    assert_some_eq!(cache.get(&key, seq - 1), vec![0xcc]);

    // empty update advances the horizon, old versions stay readable
    seq += 1;
    cache.update(vec![], seq, false);
    assert_eq!(cache.size(), 1);
    assert_some_eq!(cache.get(&key, seq), vec![0x01]);
    assert_some_eq!(cache.get(&key, seq - 1), vec![0x01]);

    // delete
    seq += 1;
    cache.update(vec![diff(42, &[])], seq, false);
    assert_eq!(cache.size(), 0);
    assert_none!(cache.get(&key, seq));
    assert_some_eq!(cache.get(&key, seq - 1), vec![0x01]);
    assert_none!(cache.successor(&FIRST_KEY, seq));
    assert_none!(cache.predecessor(&LAST_KEY, seq));
    assert_some!(cache.successor(&FIRST_KEY, seq - 1));

    // unrelated key still misses
    assert_none!(cache.get(&LedgerKey::from(23u64), seq));
}

#[test]
fn ordered_navigation_over_many_objects() {
    let cache = LedgerCache::new();
    cache.set_full();
    let seq = 10;
    let diffs: Vec<_> = (1u64..=10).map(|i| diff(i * 2, &[i as u8])).collect();
    cache.update(diffs, seq, false);
    assert_eq!(cache.size(), 10);

    // walk forward through every key
    let mut at = FIRST_KEY;
    let mut walked = Vec::new();
    while let Some(object) = cache.successor(&at, seq) {
        at = object.key;
        walked.push(object.key);
    }
    let expected: Vec<_> = (1u64..=10).map(|i| LedgerKey::from(i * 2)).collect();
    assert_eq!(walked, expected);

    // successor skips keys deleted later, at the later sequence
    cache.update(vec![diff(4, &[])], seq + 1, false);
    let after_two = cache.successor(&LedgerKey::from(2u64), seq + 1);
    assert_some_eq!(
        after_two.map(|object| object.key),
        LedgerKey::from(6u64)
    );
    // while the old sequence still sees it
    let before = cache.successor(&LedgerKey::from(2u64), seq);
    assert_some_eq!(before.map(|object| object.key), LedgerKey::from(4u64));
}

#[test]
#[should_panic(expected = "cache update out of order")]
fn foreground_updates_must_be_sequential() {
    let cache = LedgerCache::new();
    cache.update(vec![diff(1, &[1])], 5, false);
    cache.update(vec![diff(1, &[2])], 7, false);
}

#[test]
fn background_load_never_shadows_the_writer() {
    let cache = LedgerCache::new();
    let baseline = 499;

    // writer lands first with a newer version of K
    cache.update(vec![diff(7, b"X")], 500, false);

    // loader then visits K at the baseline with the snapshot value
    cache.update(vec![diff(7, b"Y")], baseline, true);
    cache.update(vec![diff(9, b"Z")], baseline, true);
    cache.set_full();

    // the writer's version is authoritative at its sequence...
    assert_some_eq!(cache.get(&LedgerKey::from(7u64), 500), b"X".to_vec());
    // ...and the snapshot version serves reads below it
    assert_some_eq!(cache.get(&LedgerKey::from(7u64), 499), b"Y".to_vec());
    // keys only the loader saw are visible from the baseline on
    assert_some_eq!(cache.get(&LedgerKey::from(9u64), 500), b"Z".to_vec());
    assert_none!(cache.get(&LedgerKey::from(9u64), 498));
}

#[test]
fn oversized_background_pages_apply_in_full() {
    // A background page far larger than one lock chunk still lands
    // completely, and writer versions in any chunk stay authoritative.
    let cache = LedgerCache::new();
    let baseline = 300;

    // the writer got ahead of the loader on two keys, one near each end
    // of the page
    cache.update(vec![diff(5, b"w5")], 301, false);
    cache.update(vec![diff(190, b"w190")], 302, false);

    let page: Vec<_> = (1u64..=200).map(|i| diff(i, &[i as u8])).collect();
    cache.update(page, baseline, true);
    cache.set_full();

    assert_eq!(cache.base_sequence(), baseline);
    for i in 1u64..=200 {
        assert_some_eq!(
            cache.get(&LedgerKey::from(i), baseline),
            vec![i as u8],
            "key {} missing from the background page",
            i
        );
    }
    // newer foreground versions were not shadowed
    assert_some_eq!(cache.get(&LedgerKey::from(5u64), 302), b"w5".to_vec());
    assert_some_eq!(cache.get(&LedgerKey::from(190u64), 302), b"w190".to_vec());
    // and the walk at the baseline covers the whole page
    let mut count = 0;
    let mut at = FIRST_KEY;
    while let Some(object) = cache.successor(&at, baseline) {
        at = object.key;
        count += 1;
    }
    assert_eq!(count, 200);
}

#[test]
fn background_duplicate_visit_is_idempotent() {
    let cache = LedgerCache::new();
    cache.update(vec![diff(3, b"A")], 100, true);
    cache.update(vec![diff(3, b"B")], 100, true);
    cache.set_full();
    assert_some_eq!(cache.get(&LedgerKey::from(3u64), 100), b"A".to_vec());
    assert_eq!(cache.size(), 1);
}

#[test]
fn background_interleaved_with_writer_matches_direct_application() {
    // Property 7 in miniature: a background load of the snapshot at S,
    // interleaved with foreground updates S+1..S+K, must equal applying
    // those updates on top of the snapshot.
    let baseline = 100;
    let interleaved = LedgerCache::new();
    let direct = LedgerCache::new();

    let snapshot: Vec<_> = (1u64..=20).map(|i| diff(i, &[i as u8])).collect();

    // direct: snapshot first, then the updates
    direct.update(snapshot.clone(), baseline, true);
    direct.set_full();

    // interleaved: writer gets ahead while the loader trickles pages in
    let (first_half, second_half) = snapshot.split_at(10);
    interleaved.update(first_half.to_vec(), baseline, true);
    interleaved.update(vec![diff(5, b"new"), diff(21, b"born")], baseline + 1, false);
    interleaved.update(vec![diff(6, &[])], baseline + 2, false);
    interleaved.update(second_half.to_vec(), baseline, true);
    interleaved.set_full();

    direct.update(vec![diff(5, b"new"), diff(21, b"born")], baseline + 1, false);
    direct.update(vec![diff(6, &[])], baseline + 2, false);

    for i in 1u64..=21 {
        let key = LedgerKey::from(i);
        for seq in [baseline, baseline + 1, baseline + 2] {
            assert_eq!(
                interleaved.get(&key, seq),
                direct.get(&key, seq),
                "key {} at seq {}",
                i,
                seq
            );
        }
    }
    assert_eq!(interleaved.size(), direct.size());
}

#[test]
fn eviction_collapses_history_to_the_baseline() {
    let cache = LedgerCache::new();
    cache.set_full();
    cache.update(vec![diff(1, b"v1"), diff(2, b"w1")], 100, false);
    cache.update(vec![diff(1, b"v2")], 101, false);
    cache.update(vec![diff(2, &[])], 102, false);
    cache.update(vec![diff(3, b"x1")], 103, false);

    // keep the newest two ledgers: baseline at 102
    cache.evict_before(102);

    // values live at the baseline survive, re-stamped
    assert_some_eq!(cache.get(&LedgerKey::from(1u64), 102), b"v2".to_vec());
    assert_some_eq!(cache.get(&LedgerKey::from(3u64), 103), b"x1".to_vec());
    // the tombstoned key is gone entirely
    assert_none!(cache.get(&LedgerKey::from(2u64), 102));
    assert_none!(cache.get(&LedgerKey::from(2u64), 103));
    // and nothing below the baseline is readable any more
    assert_none!(cache.get(&LedgerKey::from(1u64), 101));
    assert_none!(cache.get(&LedgerKey::from(2u64), 101));
    assert_eq!(cache.base_sequence(), 102);
    assert_eq!(cache.size(), 2);
}

#[test]
fn disabled_cache_ignores_everything() {
    let cache = LedgerCache::new();
    cache.disable();
    cache.update(vec![diff(1, &[1])], 1, false);
    assert_none!(cache.get(&LedgerKey::from(1u64), 1));
    assert_none!(cache.successor(&FIRST_KEY, 1));
    assert!(!cache.is_full());
    cache.set_full();
    assert!(!cache.is_full());
}

#[test]
fn hit_rates_track_requests() {
    let cache = LedgerCache::new();
    cache.update(vec![diff(1, &[1])], 1, false);
    assert_eq!(cache.object_hit_rate(), 1.0);
    let _ = cache.get(&LedgerKey::from(1u64), 1);
    let _ = cache.get(&LedgerKey::from(2u64), 1);
    assert!((cache.object_hit_rate() - 0.5).abs() < f64::EPSILON);
}
