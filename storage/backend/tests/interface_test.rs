// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Facade tests over the in-memory store: write visibility, ordered walks,
//! conflict detection, idempotent rewrites, and online deletion.

use claims::{assert_none, assert_ok, assert_some, assert_some_eq};
use quill_backend::{BackendError, BackendInterface, MockBackend};
use quill_cache::LedgerCache;
use quill_types::{
    book, AccountTransactionData, AccountId, Hash256, LedgerHeader, LedgerKey, LedgerRange,
    Sequence, FIRST_KEY, LAST_KEY,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn header(sequence: Sequence) -> LedgerHeader {
    LedgerHeader {
        sequence,
        hash: Hash256::from(sequence as u64),
        parent_hash: Hash256::from(sequence as u64 - 1),
        tx_hash: Hash256::from(0xaau64),
        state_hash: Hash256::from(0xbbu64),
        close_time: 700_000_000 + sequence as u64,
        parent_close_time: 700_000_000 + sequence as u64 - 1,
        close_time_resolution: 10,
        close_flags: 0,
        total_drops: 0,
    }
}

/// Applies a diff through the facade the way the ETL writer does, deriving
/// successor edges from the modeled prior state, and tracks the model.
struct Harness {
    facade: Arc<BackendInterface>,
    store: Arc<MockBackend>,
    model: BTreeMap<LedgerKey, Vec<u8>>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MockBackend::new());
        let facade = Arc::new(BackendInterface::new(
            store.clone(),
            Arc::new(LedgerCache::new()),
        ));
        Self {
            facade,
            store,
            model: BTreeMap::new(),
        }
    }

    async fn commit(&mut self, sequence: Sequence, diffs: &[(LedgerKey, Vec<u8>)]) -> bool {
        self.facade.start_writes();
        let mut next_state = self.model.clone();
        for (key, blob) in diffs {
            if blob.is_empty() {
                next_state.remove(key);
            } else {
                next_state.insert(*key, blob.clone());
            }
            self.facade.write_ledger_object(*key, sequence, blob.clone());
        }
        // Rebuild the full chain at this sequence; minimal successor diffs
        // are the transformer's concern, correctness here only needs a
        // valid chain per sequence.
        let mut previous = FIRST_KEY;
        for key in next_state.keys() {
            self.facade.write_successor(previous, sequence, *key);
            previous = *key;
        }
        self.facade.write_successor(previous, sequence, LAST_KEY);
        self.facade.write_ledger(header(sequence));
        let advanced = self.facade.finish_writes(sequence).await.unwrap();
        if advanced {
            self.model = next_state;
        }
        advanced
    }

    async fn walk(&self, sequence: Sequence) -> Vec<LedgerKey> {
        let mut keys = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .facade
                .fetch_ledger_page(cursor, sequence, 3)
                .await
                .unwrap();
            keys.extend(page.objects.iter().map(|object| object.key));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        keys
    }
}

#[tokio::test]
async fn first_ledger_becomes_visible_atomically() {
    let mut harness = Harness::new();
    let diffs = vec![
        (LedgerKey::from(10u64), b"balance(A)=10".to_vec()),
        (LedgerKey::from(20u64), b"balance(B)=20".to_vec()),
        (LedgerKey::from(30u64), b"balance(C)=30".to_vec()),
    ];
    assert!(harness.commit(100, &diffs).await);

    let range = assert_ok!(harness.facade.fetch_ledger_range().await);
    assert_some_eq!(range, LedgerRange::new(100, 100));

    // page walk sees all three, in key order
    assert_eq!(
        harness.walk(100).await,
        vec![
            LedgerKey::from(10u64),
            LedgerKey::from(20u64),
            LedgerKey::from(30u64)
        ]
    );

    // the cache was fed by the committed write
    assert_some_eq!(
        harness.facade.cache().get(&LedgerKey::from(20u64), 100),
        b"balance(B)=20".to_vec()
    );

    // boundary: the first page object is the minimum live key
    let first = harness
        .facade
        .fetch_ledger_page(Some(FIRST_KEY), 100, 1)
        .await
        .unwrap();
    assert_eq!(first.objects[0].key, LedgerKey::from(10u64));

    // boundary: the maximum live key has no successor
    let last = assert_ok!(
        harness
            .facade
            .fetch_successor(&LedgerKey::from(30u64), 100)
            .await
    );
    assert_none!(last);
}

#[tokio::test]
async fn deletion_rewires_the_chain() {
    let mut harness = Harness::new();
    let initial = vec![
        (LedgerKey::from(10u64), b"A=10".to_vec()),
        (LedgerKey::from(20u64), b"B=20".to_vec()),
        (LedgerKey::from(30u64), b"C=30".to_vec()),
    ];
    assert!(harness.commit(100, &initial).await);
    for sequence in 101..=105 {
        assert!(harness.commit(sequence, &[]).await);
    }

    // 106 deletes B and updates A
    let diff = vec![
        (LedgerKey::from(20u64), Vec::new()),
        (LedgerKey::from(10u64), b"A=11".to_vec()),
    ];
    assert!(harness.commit(106, &diff).await);

    assert_none!(assert_ok!(
        harness
            .facade
            .fetch_ledger_object(&LedgerKey::from(20u64), 106)
            .await
    ));
    assert_some_eq!(
        assert_ok!(
            harness
                .facade
                .fetch_ledger_object(&LedgerKey::from(20u64), 105)
                .await
        ),
        b"B=20".to_vec()
    );
    assert_eq!(
        harness.walk(106).await,
        vec![LedgerKey::from(10u64), LedgerKey::from(30u64)]
    );
    let successor = assert_ok!(
        harness
            .facade
            .fetch_successor(&LedgerKey::from(10u64), 106)
            .await
    );
    assert_some_eq!(
        successor.map(|object| object.key),
        LedgerKey::from(30u64)
    );
}

#[tokio::test]
async fn losing_the_tip_race_reports_a_conflict() {
    let store = Arc::new(MockBackend::new());
    let p1 = BackendInterface::new(store.clone(), Arc::new(LedgerCache::new()));
    let p2 = BackendInterface::new(store.clone(), Arc::new(LedgerCache::new()));

    // p1 seeds the store with 100
    p1.start_writes();
    p1.write_ledger_object(LedgerKey::from(1u64), 100, b"x".to_vec());
    p1.write_ledger(header(100));
    assert!(p1.finish_writes(100).await.unwrap());

    assert_ok!(p2.open().await);

    // both race to commit 101; p1 wins
    p1.start_writes();
    p1.write_ledger(header(101));
    assert!(p1.finish_writes(101).await.unwrap());

    p2.start_writes();
    p2.write_ledger(header(101));
    assert!(!p2.finish_writes(101).await.unwrap());

    // the store's range is p1's
    let range = assert_ok!(p2.fetch_ledger_range().await);
    assert_some_eq!(range, LedgerRange::new(100, 101));
}

#[tokio::test]
async fn rewriting_a_ledger_is_a_noop() {
    let mut harness = Harness::new();
    let diffs = vec![
        (LedgerKey::from(10u64), b"A".to_vec()),
        (LedgerKey::from(20u64), b"B".to_vec()),
    ];
    assert!(harness.commit(100, &diffs).await);
    let objects_before = harness.store.object_version_count();
    let successors_before = harness.store.successor_version_count();

    // a second writer replays the same ledger; rows are identical and the
    // tip update reports the conflict
    let replay = BackendInterface::new(harness.store.clone(), Arc::new(LedgerCache::new()));
    replay.start_writes();
    for (key, blob) in &diffs {
        replay.write_ledger_object(*key, 100, blob.clone());
    }
    replay.write_ledger(header(100));
    assert!(!replay.finish_writes(100).await.unwrap());

    assert_eq!(harness.store.object_version_count(), objects_before);
    assert_eq!(harness.store.successor_version_count(), successors_before);
    assert_eq!(
        harness.walk(100).await,
        vec![LedgerKey::from(10u64), LedgerKey::from(20u64)]
    );
}

#[tokio::test]
async fn online_delete_preserves_the_baseline() {
    let mut harness = Harness::new();
    let key = LedgerKey::from(42u64);
    // the object's value changes every few ledgers
    for sequence in 100..=120 {
        let diffs = if sequence % 3 == 0 {
            vec![(key, format!("value-at-{}", sequence).into_bytes())]
        } else {
            Vec::new()
        };
        assert!(harness.commit(sequence, &diffs).await);
    }

    let before = assert_ok!(harness.facade.fetch_ledger_object(&key, 115).await);
    assert!(harness.facade.do_online_delete(5).await.unwrap());

    // keep_min = 120 - 5
    let range = assert_ok!(harness.facade.fetch_ledger_range().await);
    assert_some_eq!(range, LedgerRange::new(115, 120));

    // the value at the new minimum is what it was before deletion
    let after = assert_ok!(harness.facade.fetch_ledger_object(&key, 115).await);
    assert_eq!(after, before);
    assert_some!(after);

    // history below the baseline is gone
    assert_none!(assert_ok!(
        harness.facade.fetch_ledger_object(&key, 114).await
    ));
    let err = harness
        .facade
        .fetch_ledger_page(None, 110, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound));

    // the chain at the baseline still walks
    assert_eq!(harness.walk(115).await, vec![key]);
}

#[tokio::test]
async fn book_offers_walk_directories() {
    let mut harness = Harness::new();

    // book root directory with two offers and two more sub-pages holding
    // one offer each
    let mut root_bytes = [0u8; 32];
    root_bytes[0] = 0x20;
    let root = LedgerKey::new(root_bytes);
    let page_two = book::directory_page_key(&root, 1);
    let page_three = book::directory_page_key(&root, 2);

    let offer_a = LedgerKey::from(0x1000u64);
    let offer_b = LedgerKey::from(0x2000u64);
    let offer_c = LedgerKey::from(0x3000u64);
    let offer_d = LedgerKey::from(0x4000u64);

    let diffs = vec![
        (root, book::encode_directory(Some(&root), &[offer_a, offer_b], 1)),
        (page_two, book::encode_directory(Some(&root), &[offer_c], 2)),
        (page_three, book::encode_directory(Some(&root), &[offer_d], 0)),
        (offer_a, b"offer-a".to_vec()),
        (offer_b, b"offer-b".to_vec()),
        (offer_c, b"offer-c".to_vec()),
        (offer_d, b"offer-d".to_vec()),
    ];
    assert!(harness.commit(100, &diffs).await);

    let page = assert_ok!(harness.facade.fetch_book_offers(&root, 100, 10, None).await);
    let keys: Vec<LedgerKey> = page.offers.iter().map(|offer| offer.key).collect();
    assert_eq!(keys, vec![offer_a, offer_b, offer_c, offer_d]);
    assert_none!(page.cursor);
}

#[tokio::test]
async fn book_offers_paginate_across_sub_pages_without_loss() {
    let mut harness = Harness::new();

    let mut root_bytes = [0u8; 32];
    root_bytes[0] = 0x20;
    let root = LedgerKey::new(root_bytes);
    let page_two = book::directory_page_key(&root, 1);
    let page_three = book::directory_page_key(&root, 2);

    let offer_a = LedgerKey::from(0x1000u64);
    let offer_b = LedgerKey::from(0x2000u64);
    let offer_c = LedgerKey::from(0x3000u64);
    let offer_d = LedgerKey::from(0x4000u64);

    let diffs = vec![
        (root, book::encode_directory(Some(&root), &[offer_a, offer_b], 1)),
        (page_two, book::encode_directory(Some(&root), &[offer_c], 2)),
        (page_three, book::encode_directory(Some(&root), &[offer_d], 0)),
        (offer_a, b"offer-a".to_vec()),
        (offer_b, b"offer-b".to_vec()),
        (offer_c, b"offer-c".to_vec()),
        (offer_d, b"offer-d".to_vec()),
    ];
    assert!(harness.commit(100, &diffs).await);

    // page of 2: the root page fills it; the cursor names the first
    // unreturned sub-page
    let first = assert_ok!(harness.facade.fetch_book_offers(&root, 100, 2, None).await);
    let keys: Vec<LedgerKey> = first.offers.iter().map(|offer| offer.key).collect();
    assert_eq!(keys, vec![offer_a, offer_b]);
    let cursor = assert_some!(first.cursor);
    assert_eq!(cursor, page_two);

    // resuming at the sub-page continues the same chain, losing nothing
    let second = assert_ok!(
        harness
            .facade
            .fetch_book_offers(&root, 100, 1, Some(cursor))
            .await
    );
    let keys: Vec<LedgerKey> = second.offers.iter().map(|offer| offer.key).collect();
    assert_eq!(keys, vec![offer_c]);
    let cursor = assert_some!(second.cursor);
    assert_eq!(cursor, page_three);

    let third = assert_ok!(
        harness
            .facade
            .fetch_book_offers(&root, 100, 10, Some(cursor))
            .await
    );
    let keys: Vec<LedgerKey> = third.offers.iter().map(|offer| offer.key).collect();
    assert_eq!(keys, vec![offer_d]);
    assert_none!(third.cursor);

    // a cursor naming an exhausted root walks on to the next directory,
    // which this single-quality book does not have
    let past_end = assert_ok!(
        harness
            .facade
            .fetch_book_offers(&root, 100, 10, Some(root))
            .await
    );
    assert!(past_end.offers.is_empty());
    assert_none!(past_end.cursor);
}

#[tokio::test]
async fn account_transactions_page_newest_first() {
    let harness = Harness::new();
    let account = AccountId::from(7u64);
    harness.facade.start_writes();
    let mut rows = Vec::new();
    for sequence in 100..103u32 {
        for index in 0..2u32 {
            let hash = Hash256::from((sequence * 10 + index) as u64);
            harness.facade.write_transaction(
                hash,
                sequence,
                700_000_000,
                format!("tx-{}-{}", sequence, index).into_bytes(),
                b"meta".to_vec(),
            );
            rows.push(AccountTransactionData {
                account,
                ledger_sequence: sequence,
                transaction_index: index,
                transaction_hash: hash,
            });
        }
    }
    harness.facade.write_account_transactions(rows);
    harness.facade.write_ledger(header(102));
    // commit everything under one tip write; sequences 100..=101 were
    // never separately committed, which is irrelevant to this index
    assert!(harness.facade.finish_writes(102).await.unwrap());

    let (transactions, cursor) = assert_ok!(
        harness
            .facade
            .fetch_account_transactions(&account, 4, false, None)
            .await
    );
    assert_eq!(transactions.len(), 4);
    assert_eq!(transactions[0].transaction, b"tx-102-1".to_vec());
    assert_eq!(transactions[3].transaction, b"tx-101-0".to_vec());
    let cursor = assert_some!(cursor);

    let (rest, end) = assert_ok!(
        harness
            .facade
            .fetch_account_transactions(&account, 10, false, Some(cursor))
            .await
    );
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].transaction, b"tx-100-1".to_vec());
    assert_none!(end);
}

#[tokio::test]
async fn invalid_limits_are_rejected() {
    let harness = Harness::new();
    let err = harness
        .facade
        .fetch_ledger_page(None, 100, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));

    let err = harness
        .facade
        .fetch_account_transactions(&AccountId::from(1u64), 0, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));
}

#[tokio::test]
async fn injected_faults_surface_as_errors() {
    let harness = Harness::new();
    harness.store.inject_fault(BackendError::Timeout);
    let err = harness.facade.fetch_ledger_range().await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout));
    // the next call goes through
    assert_ok!(harness.facade.fetch_ledger_range().await);
}
