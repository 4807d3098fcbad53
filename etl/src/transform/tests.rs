// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::pipeline::write_ledger;
use claims::{assert_matches, assert_ok, assert_some_eq};
use quill_backend::{BackendInterface, MockBackend};
use quill_cache::LedgerCache;
use quill_protos::ledger::v1::{
    GetLedgerResponse, RawLedgerObject, RawLedgerObjects, TransactionsList,
};
use quill_types::stobject::{encode_account, encode_blob, encode_hash256, encode_u16};
use std::sync::Arc;

fn harness() -> (Arc<BackendInterface>, Arc<MockBackend>) {
    let store = Arc::new(MockBackend::new());
    let facade = Arc::new(BackendInterface::new(
        store.clone(),
        Arc::new(LedgerCache::new()),
    ));
    (facade, store)
}

fn facade() -> Arc<BackendInterface> {
    harness().0
}

/// Walk the committed successor *table* from FIRST_KEY, the read path the
/// distributed backends use.
fn walk_successor_table(store: &MockBackend, sequence: Sequence) -> Vec<LedgerKey> {
    let mut keys = Vec::new();
    let mut at = FIRST_KEY;
    while let Some(next) = store.successor_table_resolve(&at, sequence) {
        if next == LAST_KEY {
            break;
        }
        keys.push(next);
        at = next;
    }
    keys
}

fn header(sequence: Sequence, parent_hash: Hash256) -> LedgerHeader {
    LedgerHeader {
        sequence,
        hash: Hash256::from(sequence as u64),
        parent_hash,
        close_time: 700_000_000 + sequence as u64,
        ..LedgerHeader::default()
    }
}

fn raw_object(key: u64, data: &[u8], mod_type: ModificationType) -> RawLedgerObject {
    RawLedgerObject {
        key: LedgerKey::from(key).to_vec(),
        data: data.to_vec(),
        mod_type: mod_type as i32,
    }
}

fn response_with_objects(
    header: &LedgerHeader,
    objects: Vec<RawLedgerObject>,
) -> GetLedgerResponse {
    GetLedgerResponse {
        validated: true,
        ledger_header: header.to_blob(),
        transactions_list: None,
        ledger_objects: Some(RawLedgerObjects { objects }),
        objects_included: true,
    }
}

/// Commit keys 10, 20, 30 as ledger 105 so derivations have a parent
/// chain to look at.
async fn seed_parent(facade: &Arc<BackendInterface>) -> LedgerHeader {
    let parent = header(105, Hash256::from(104u64));
    let objects = vec![
        raw_object(10, b"A=10", ModificationType::Created),
        raw_object(20, b"B=20", ModificationType::Created),
        raw_object(30, b"C=30", ModificationType::Created),
    ];
    let transformed = transform(facade, &response_with_objects(&parent, objects), None)
        .await
        .unwrap();
    assert!(write_ledger(facade, &transformed).await.unwrap());
    parent
}

#[tokio::test]
async fn deletion_produces_a_single_bridging_edge() {
    let facade = facade();
    let parent = seed_parent(&facade).await;

    let next = header(106, parent.hash);
    let objects = vec![
        raw_object(20, b"", ModificationType::Deleted),
        raw_object(10, b"A=11", ModificationType::Modified),
    ];
    let transformed = assert_ok!(
        transform(&facade, &response_with_objects(&next, objects), Some(parent.hash)).await
    );

    // deleting B bridges A directly to C; the modified key adds nothing
    assert_eq!(
        transformed.successor_diffs,
        vec![SuccessorEntry {
            key: LedgerKey::from(10u64),
            successor: LedgerKey::from(30u64),
        }]
    );
    assert_eq!(transformed.object_diffs.len(), 2);
    assert!(transformed.object_diffs[0].is_deleted());
}

#[tokio::test]
async fn creation_splices_two_edges() {
    let facade = facade();
    let parent = seed_parent(&facade).await;

    let next = header(106, parent.hash);
    let objects = vec![raw_object(25, b"D=25", ModificationType::Created)];
    let transformed = assert_ok!(
        transform(&facade, &response_with_objects(&next, objects), Some(parent.hash)).await
    );

    assert_eq!(
        transformed.successor_diffs,
        vec![
            SuccessorEntry {
                key: LedgerKey::from(20u64),
                successor: LedgerKey::from(25u64),
            },
            SuccessorEntry {
                key: LedgerKey::from(25u64),
                successor: LedgerKey::from(30u64),
            },
        ]
    );
}

#[tokio::test]
async fn batched_neighbors_derive_against_the_overlaid_chain() {
    let (facade, store) = harness();
    let parent = seed_parent(&facade).await;

    // one ledger creates two adjacent keys and deletes their neighbor
    let next = header(106, parent.hash);
    let objects = vec![
        raw_object(21, b"x", ModificationType::Created),
        raw_object(22, b"y", ModificationType::Created),
        raw_object(20, b"", ModificationType::Deleted),
    ];
    let transformed = assert_ok!(
        transform(&facade, &response_with_objects(&next, objects), Some(parent.hash)).await
    );
    assert!(write_ledger(&facade, &transformed).await.unwrap());

    // the committed chain at 106 walks 10 -> 21 -> 22 -> 30, both through
    // the facade and through the raw successor table
    let expected = vec![
        LedgerKey::from(10u64),
        LedgerKey::from(21u64),
        LedgerKey::from(22u64),
        LedgerKey::from(30u64),
    ];
    let mut walked = Vec::new();
    let mut at = FIRST_KEY;
    while let Some(object) = facade.fetch_successor(&at, 106).await.unwrap() {
        walked.push(object.key);
        at = object.key;
    }
    assert_eq!(walked, expected);
    assert_eq!(walk_successor_table(&store, 106), expected);
    // the parent chain is untouched
    assert_eq!(
        walk_successor_table(&store, 105),
        vec![
            LedgerKey::from(10u64),
            LedgerKey::from(20u64),
            LedgerKey::from(30u64),
        ]
    );
}

#[tokio::test]
async fn unclassified_objects_are_resolved_against_the_parent() {
    let facade = facade();
    let parent = seed_parent(&facade).await;

    let next = header(106, parent.hash);
    let objects = vec![
        // no mod_type from this upstream: 40 is new, 10 is an update
        raw_object(40, b"new", ModificationType::Unspecified),
        raw_object(10, b"A=12", ModificationType::Unspecified),
    ];
    let transformed = assert_ok!(
        transform(&facade, &response_with_objects(&next, objects), Some(parent.hash)).await
    );
    // only the creation splices edges: 30 -> 40 -> LAST
    assert_eq!(
        transformed.successor_diffs,
        vec![
            SuccessorEntry {
                key: LedgerKey::from(30u64),
                successor: LedgerKey::from(40u64),
            },
            SuccessorEntry {
                key: LedgerKey::from(40u64),
                successor: LAST_KEY,
            },
        ]
    );
}

#[tokio::test]
async fn parent_hash_mismatch_is_rejected() {
    let facade = facade();
    let parent = seed_parent(&facade).await;

    let bad = header(106, Hash256::from(0xbadu64));
    let result = transform(
        &facade,
        &response_with_objects(&bad, Vec::new()),
        Some(parent.hash),
    )
    .await;
    assert_matches!(result, Err(TransformError::ParentHashMismatch { sequence: 106, .. }));
}

#[tokio::test]
async fn malformed_headers_are_rejected() {
    let facade = facade();
    let response = GetLedgerResponse {
        validated: true,
        ledger_header: b"garbage".to_vec(),
        transactions_list: None,
        ledger_objects: None,
        objects_included: false,
    };
    let result = transform(&facade, &response, None).await;
    assert_matches!(result, Err(TransformError::BadHeader));
}

#[tokio::test]
async fn transactions_index_every_metadata_account() {
    let facade = facade();
    let parent = seed_parent(&facade).await;

    let alice = AccountId::from(0xa11ceu64);
    let bob = AccountId::from(0xb0bu64);
    let mut metadata = Vec::new();
    encode_account(&mut metadata, 1, alice.as_bytes());
    encode_account(&mut metadata, 2, bob.as_bytes());
    encode_account(&mut metadata, 3, alice.as_bytes()); // repeated

    let next = header(106, parent.hash);
    let mut response = response_with_objects(&next, Vec::new());
    response.transactions_list = Some(TransactionsList {
        transactions: vec![quill_protos::ledger::v1::TransactionAndMetadata {
            transaction_blob: b"tx-blob".to_vec(),
            metadata_blob: metadata,
        }],
    });

    let transformed = assert_ok!(transform(&facade, &response, Some(parent.hash)).await);
    assert_eq!(transformed.transactions.len(), 1);
    let hash = transformed.transactions[0].hash;
    assert_eq!(transformed.account_tx.len(), 2);
    assert_eq!(transformed.accounts_of(&hash), vec![alice, bob]);
    assert_eq!(transformed.account_tx[0].transaction_index, 0);
}

#[tokio::test]
async fn nft_mints_and_burns_are_indexed() {
    let facade = facade();
    let parent = seed_parent(&facade).await;
    let token = Hash256::from(0x7071u64);
    let owner = AccountId::from(0x0eeeu64);

    let mut mint_meta = Vec::new();
    encode_account(&mut mint_meta, 1, owner.as_bytes());
    encode_hash256(&mut mint_meta, FIELD_NFT_TOKEN_ID, token.as_bytes());
    let mut mint_tx = Vec::new();
    encode_u16(&mut mint_tx, FIELD_TRANSACTION_TYPE, TX_TYPE_NFT_MINT);
    encode_blob(&mut mint_tx, FIELD_URI, b"ipfs://nft");

    let mut burn_meta = Vec::new();
    encode_account(&mut burn_meta, 1, owner.as_bytes());
    encode_hash256(&mut burn_meta, FIELD_NFT_TOKEN_ID, token.as_bytes());
    let mut burn_tx = Vec::new();
    encode_u16(&mut burn_tx, FIELD_TRANSACTION_TYPE, TX_TYPE_NFT_BURN);

    let next = header(106, parent.hash);
    let mut response = response_with_objects(&next, Vec::new());
    response.transactions_list = Some(TransactionsList {
        transactions: vec![
            quill_protos::ledger::v1::TransactionAndMetadata {
                transaction_blob: mint_tx,
                metadata_blob: mint_meta,
            },
            quill_protos::ledger::v1::TransactionAndMetadata {
                transaction_blob: burn_tx,
                metadata_blob: burn_meta,
            },
        ],
    });

    let transformed = assert_ok!(transform(&facade, &response, Some(parent.hash)).await);
    assert_eq!(transformed.nfts.len(), 2);
    let mint = &transformed.nfts[0];
    assert_eq!(mint.token_id, token);
    assert_eq!(mint.owner, owner);
    assert!(!mint.is_burned);
    assert_some_eq!(mint.uri.clone(), b"ipfs://nft".to_vec());
    let burn = &transformed.nfts[1];
    assert!(burn.is_burned);
    assert_eq!(burn.uri, None);
    assert_eq!(transformed.nft_tx.len(), 2);
    assert_eq!(transformed.nft_tx[1].transaction_index, 1);
}
