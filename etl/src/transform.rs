// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transform stage: turn one extracted ledger payload into everything the
//! write stage commits — header, transactions, object diffs, derived
//! successor edges, and the account/NFT index rows mined out of
//! transaction metadata.

use quill_backend::{BackendError, BackendInterface, TransactionWrite};
use quill_protos::ledger::v1::{
    raw_ledger_object::ModificationType, GetLedgerResponse, RawLedgerObject,
};
use quill_types::{
    stobject::{self, Field},
    transaction::transaction_hash,
    AccountId, AccountTransactionData, Hash256, LedgerHeader, LedgerKey, NftData,
    NftTransactionData, ObjectDiff, Sequence, SuccessorEntry, FIRST_KEY, LAST_KEY,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use thiserror::Error;

/// TransactionType, UInt16 field 2 of a signed transaction.
const FIELD_TRANSACTION_TYPE: u8 = 2;
/// NFTokenID, Hash256 field 10, present in metadata of NFT transactions.
const FIELD_NFT_TOKEN_ID: u8 = 10;
/// URI, Blob field 5, present in NFT mints.
const FIELD_URI: u8 = 5;

const TX_TYPE_NFT_MINT: u16 = 25;
const TX_TYPE_NFT_BURN: u16 = 26;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("upstream payload carried a malformed ledger header")]
    BadHeader,
    #[error("parent hash mismatch at {sequence}: expected {expected}, got {actual}")]
    ParentHashMismatch {
        sequence: Sequence,
        expected: Hash256,
        actual: Hash256,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Everything the write stage needs for one ledger.
#[derive(Clone, Debug, Default)]
pub struct TransformedLedger {
    pub header: LedgerHeader,
    pub transactions: Vec<TransactionWrite>,
    pub object_diffs: Vec<ObjectDiff>,
    pub successor_diffs: Vec<SuccessorEntry>,
    pub account_tx: Vec<AccountTransactionData>,
    pub nfts: Vec<NftData>,
    pub nft_tx: Vec<NftTransactionData>,
}

impl TransformedLedger {
    pub fn txn_count(&self) -> u32 {
        self.transactions.len() as u32
    }

    /// Affected accounts per transaction hash, for subscription fan-out.
    pub fn accounts_of(&self, hash: &Hash256) -> Vec<AccountId> {
        self.account_tx
            .iter()
            .filter(|row| row.transaction_hash == *hash)
            .map(|row| row.account)
            .collect()
    }
}

/// Transform one extracted payload. `expected_parent` enforces hash
/// chaining against the previously transformed (or persisted) header.
///
/// Successor edges are derived against the parent ledger's chain with the
/// current diff overlaid, so a batch that creates and deletes neighboring
/// keys still yields a consistent chain. Lookups into the parent chain go
/// through the cache when it has coverage and fall back to the store.
pub async fn transform(
    facade: &BackendInterface,
    response: &GetLedgerResponse,
    expected_parent: Option<Hash256>,
) -> Result<TransformedLedger, TransformError> {
    let header =
        LedgerHeader::from_blob(&response.ledger_header).ok_or(TransformError::BadHeader)?;
    if let Some(expected) = expected_parent {
        if header.parent_hash != expected {
            return Err(TransformError::ParentHashMismatch {
                sequence: header.sequence,
                expected,
                actual: header.parent_hash,
            });
        }
    }

    let raw_objects: &[RawLedgerObject] = response
        .ledger_objects
        .as_ref()
        .map(|wrapper| wrapper.objects.as_slice())
        .unwrap_or_default();
    let mut object_diffs = Vec::with_capacity(raw_objects.len());
    // Post-diff view of the touched keys: true = live after this ledger.
    let mut overlay: BTreeMap<LedgerKey, bool> = BTreeMap::new();
    let mut created = Vec::new();
    let mut deleted = Vec::new();
    for raw in raw_objects {
        let Some(key) = LedgerKey::from_slice(&raw.key) else {
            continue;
        };
        let is_deleted =
            raw.data.is_empty() || raw.mod_type() == ModificationType::Deleted;
        overlay.insert(key, !is_deleted);
        match raw.mod_type() {
            ModificationType::Deleted => deleted.push(key),
            ModificationType::Created => created.push(key),
            ModificationType::Modified => {},
            ModificationType::Unspecified => {
                // Older upstreams do not classify; consult the parent state.
                if is_deleted {
                    deleted.push(key);
                } else if facade
                    .fetch_ledger_object(&key, header.sequence - 1)
                    .await?
                    .is_none()
                {
                    created.push(key);
                }
            },
        }
        object_diffs.push(ObjectDiff {
            key,
            blob: if is_deleted { Vec::new() } else { raw.data.clone() },
        });
    }

    let mut edges: BTreeMap<LedgerKey, LedgerKey> = BTreeMap::new();
    let parent_sequence = header.sequence.saturating_sub(1);
    for key in &deleted {
        let previous = live_predecessor(facade, &overlay, key, parent_sequence).await?;
        let next = live_successor(facade, &overlay, key, parent_sequence).await?;
        edges.insert(previous, next);
    }
    for key in &created {
        let previous = live_predecessor(facade, &overlay, key, parent_sequence).await?;
        let next = live_successor(facade, &overlay, key, parent_sequence).await?;
        edges.insert(previous, *key);
        edges.insert(*key, next);
    }
    let successor_diffs = edges
        .into_iter()
        .map(|(key, successor)| SuccessorEntry { key, successor })
        .collect();

    let mut transformed = TransformedLedger {
        header: header.clone(),
        transactions: Vec::new(),
        object_diffs,
        successor_diffs,
        account_tx: Vec::new(),
        nfts: Vec::new(),
        nft_tx: Vec::new(),
    };

    let transactions = response
        .transactions_list
        .as_ref()
        .map(|wrapper| wrapper.transactions.as_slice())
        .unwrap_or_default();
    for (index, tx) in transactions.iter().enumerate() {
        let hash = transaction_hash(&tx.transaction_blob);
        transformed.transactions.push(TransactionWrite {
            hash,
            transaction: tx.transaction_blob.clone(),
            metadata: tx.metadata_blob.clone(),
            ledger_sequence: header.sequence,
            close_time: header.close_time,
        });
        for account in extract_accounts(&tx.metadata_blob) {
            transformed.account_tx.push(AccountTransactionData {
                account,
                ledger_sequence: header.sequence,
                transaction_index: index as u32,
                transaction_hash: hash,
            });
        }
        let (token_ids, owner) = extract_nft_fields(&tx.metadata_blob);
        if !token_ids.is_empty() {
            let (tx_type, uri) = extract_tx_fields(&tx.transaction_blob);
            for token_id in &token_ids {
                transformed.nft_tx.push(NftTransactionData {
                    token_id: *token_id,
                    ledger_sequence: header.sequence,
                    transaction_index: index as u32,
                    transaction_hash: hash,
                });
                transformed.nfts.push(NftData {
                    token_id: *token_id,
                    ledger_sequence: header.sequence,
                    owner: owner.unwrap_or_default(),
                    is_burned: tx_type == Some(TX_TYPE_NFT_BURN),
                    uri: if tx_type == Some(TX_TYPE_NFT_MINT) {
                        uri.clone()
                    } else {
                        None
                    },
                });
            }
        }
    }

    Ok(transformed)
}

/// First live key after `key` once the diff is applied: the minimum of the
/// overlay's next live key and the parent chain's next key that the diff
/// did not delete. `LAST_KEY` when the chain ends.
async fn live_successor(
    facade: &BackendInterface,
    overlay: &BTreeMap<LedgerKey, bool>,
    key: &LedgerKey,
    parent_sequence: Sequence,
) -> Result<LedgerKey, BackendError> {
    let overlay_next = overlay
        .range((Excluded(*key), Unbounded))
        .find(|(_, live)| **live)
        .map(|(candidate, _)| *candidate);
    let mut at = *key;
    let parent_next = loop {
        let next = facade
            .fetch_successor(&at, parent_sequence)
            .await?
            .map(|object| object.key);
        match next {
            Some(candidate) => {
                if overlay.get(&candidate) == Some(&false) {
                    at = candidate;
                    continue;
                }
                break Some(candidate);
            },
            None => break None,
        }
    };
    Ok([overlay_next, parent_next]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(LAST_KEY))
}

/// Mirror image of [`live_successor`]. `FIRST_KEY` when nothing precedes.
async fn live_predecessor(
    facade: &BackendInterface,
    overlay: &BTreeMap<LedgerKey, bool>,
    key: &LedgerKey,
    parent_sequence: Sequence,
) -> Result<LedgerKey, BackendError> {
    let overlay_previous = overlay
        .range(..*key)
        .rev()
        .find(|(_, live)| **live)
        .map(|(candidate, _)| *candidate);
    let mut at = *key;
    let parent_previous = loop {
        let previous = facade
            .fetch_predecessor(&at, parent_sequence)
            .await?
            .map(|object| object.key);
        match previous {
            Some(candidate) => {
                if overlay.get(&candidate) == Some(&false) {
                    at = candidate;
                    continue;
                }
                break Some(candidate);
            },
            None => break None,
        }
    };
    Ok([overlay_previous, parent_previous]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(FIRST_KEY))
}

/// Every account referenced anywhere in a metadata blob, deduplicated in
/// encounter order. Unparseable metadata indexes nothing.
pub fn extract_accounts(metadata: &[u8]) -> Vec<AccountId> {
    let mut seen = BTreeSet::new();
    let mut accounts = Vec::new();
    let _ = stobject::walk_fields(metadata, &mut |field: Field<'_>| {
        if field.type_code == stobject::TYPE_ACCOUNT {
            if let Some(account) = AccountId::from_slice(field.payload) {
                if seen.insert(account) {
                    accounts.push(account);
                }
            }
        }
    });
    accounts
}

/// NFT token ids named by a metadata blob, plus the first account in it
/// (the involved owner for mint/burn/transfer rows).
fn extract_nft_fields(metadata: &[u8]) -> (Vec<Hash256>, Option<AccountId>) {
    let mut token_ids = Vec::new();
    let mut owner = None;
    let _ = stobject::walk_fields(metadata, &mut |field: Field<'_>| match field.type_code {
        stobject::TYPE_HASH256 if field.field_code == FIELD_NFT_TOKEN_ID => {
            if let Some(token_id) = Hash256::from_slice(field.payload) {
                if !token_ids.contains(&token_id) {
                    token_ids.push(token_id);
                }
            }
        },
        stobject::TYPE_ACCOUNT if owner.is_none() => {
            owner = AccountId::from_slice(field.payload);
        },
        _ => {},
    });
    (token_ids, owner)
}

/// Transaction type and URI out of a signed transaction blob.
fn extract_tx_fields(transaction: &[u8]) -> (Option<u16>, Option<Vec<u8>>) {
    let mut tx_type = None;
    let mut uri = None;
    let _ = stobject::walk_fields(transaction, &mut |field: Field<'_>| match field.type_code {
        stobject::TYPE_UINT16 if field.field_code == FIELD_TRANSACTION_TYPE => {
            if let Ok(bytes) = field.payload.try_into() {
                tx_type = Some(u16::from_be_bytes(bytes));
            }
        },
        stobject::TYPE_BLOB if field.field_code == FIELD_URI => {
            uri = Some(field.payload.to_vec());
        },
        _ => {},
    });
    (tx_type, uri)
}

#[cfg(test)]
mod tests;
