// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end checks of the transform → write → publish path over the
//! in-memory backend.

use crate::{
    pipeline::write_ledger, publish::LedgerPublisher, transform::transform,
};
use claims::{assert_ok, assert_some, assert_some_eq};
use quill_backend::{BackendInterface, MockBackend};
use quill_cache::LedgerCache;
use quill_protos::ledger::v1::{
    raw_ledger_object::ModificationType, GetLedgerResponse, RawLedgerObject,
    RawLedgerObjects, TransactionAndMetadata, TransactionsList,
};
use quill_subscriptions::{Subscriber, SubscriptionManager};
use quill_types::{
    stobject::encode_account, AccountId, Hash256, LedgerHeader, LedgerKey, LedgerRange,
    ObjectDiff, Sequence,
};
use std::sync::Arc;

fn header(sequence: Sequence, parent_hash: Hash256) -> LedgerHeader {
    LedgerHeader {
        sequence,
        hash: Hash256::from(sequence as u64),
        parent_hash,
        close_time: 700_000_000 + sequence as u64,
        ..LedgerHeader::default()
    }
}

fn account_state(balance: u32) -> Vec<u8> {
    format!("balance={}", balance).into_bytes()
}

#[tokio::test]
async fn first_ledger_flows_from_payload_to_queryable_state() {
    let facade = Arc::new(BackendInterface::new(
        Arc::new(MockBackend::new()),
        Arc::new(LedgerCache::new()),
    ));
    let subscriptions = SubscriptionManager::new();
    let publisher = LedgerPublisher::new(facade.clone(), subscriptions.clone());

    let (subscriber, mut events) = Subscriber::new();
    subscriptions.sub_ledger(&subscriber);

    // upstream publishes validated ledger 100 with accounts A, B, C
    let first = header(100, Hash256::from(99u64));
    let accounts: Vec<(u64, u32)> = vec![(10, 10), (20, 20), (30, 30)];
    let objects = accounts
        .iter()
        .map(|(key, balance)| RawLedgerObject {
            key: LedgerKey::from(*key).to_vec(),
            data: account_state(*balance),
            mod_type: ModificationType::Created as i32,
        })
        .collect();
    let mut metadata = Vec::new();
    encode_account(&mut metadata, 1, AccountId::from(10u64).as_bytes());
    let response = GetLedgerResponse {
        validated: true,
        ledger_header: first.to_blob(),
        transactions_list: Some(TransactionsList {
            transactions: vec![TransactionAndMetadata {
                transaction_blob: b"payment".to_vec(),
                metadata_blob: metadata,
            }],
        }),
        ledger_objects: Some(RawLedgerObjects { objects }),
        objects_included: true,
    };

    let transformed = assert_ok!(transform(&facade, &response, None).await);
    // the pipeline's transformer advances the cache before the write
    let diffs: Vec<ObjectDiff> = transformed.object_diffs.clone();
    facade.cache().update(diffs, 100, false);
    assert!(assert_ok!(write_ledger(&facade, &transformed).await));
    publisher.publish_transformed(&transformed).await;

    // the committed range is exactly [100, 100]
    let range = assert_ok!(facade.fetch_ledger_range().await);
    assert_some_eq!(range, LedgerRange::new(100, 100));

    // a page walk at 100 yields A, B, C in key order
    let page = assert_ok!(facade.fetch_ledger_page(None, 100, 10).await);
    let keys: Vec<LedgerKey> = page.objects.iter().map(|object| object.key).collect();
    assert_eq!(
        keys,
        vec![
            LedgerKey::from(10u64),
            LedgerKey::from(20u64),
            LedgerKey::from(30u64)
        ]
    );

    // the cache serves B directly
    assert_some_eq!(
        facade.cache().get(&LedgerKey::from(20u64), 100),
        account_state(20)
    );

    // subscribers saw exactly one ledgerClosed event with the tx count
    let event = assert_some!(events.recv().await);
    let parsed: serde_json::Value = serde_json::from_str(&event).unwrap();
    assert_eq!(parsed["type"], "ledgerClosed");
    assert_eq!(parsed["ledger_index"], 100);
    assert_eq!(parsed["txn_count"], 1);
    assert_eq!(parsed["validated_ledgers"], "100");
}

#[tokio::test]
async fn store_committed_ledgers_publish_with_transactions() {
    let facade = Arc::new(BackendInterface::new(
        Arc::new(MockBackend::new()),
        Arc::new(LedgerCache::new()),
    ));
    let subscriptions = SubscriptionManager::new();
    let publisher = LedgerPublisher::new(facade.clone(), subscriptions.clone());

    // another process wrote ledger 200 with one transaction
    let alice = AccountId::from(7u64);
    let mut metadata = Vec::new();
    encode_account(&mut metadata, 1, alice.as_bytes());
    facade.start_writes();
    facade.write_transaction(
        Hash256::from(1u64),
        200,
        700_000_200,
        b"tx".to_vec(),
        metadata,
    );
    facade.write_ledger(header(200, Hash256::from(199u64)));
    assert!(assert_ok!(facade.finish_writes(200).await));

    let (ledger_subscriber, mut ledger_events) = Subscriber::new();
    subscriptions.sub_ledger(&ledger_subscriber);
    let (account_subscriber, mut account_events) = Subscriber::new();
    subscriptions.sub_account(alice, &account_subscriber);

    assert!(assert_ok!(publisher.publish_from_store(200, 1).await));
    assert_some!(ledger_events.recv().await);
    let tx_event = assert_some!(account_events.recv().await);
    let parsed: serde_json::Value = serde_json::from_str(&tx_event).unwrap();
    assert_eq!(parsed["type"], "transaction");
    assert_eq!(parsed["ledger_index"], 200);

    // an unreadable sequence reports failure instead of hanging
    assert!(!assert_ok!(publisher.publish_from_store(201, 1).await));
    assert_some!(publisher.last_publish_age());
}
