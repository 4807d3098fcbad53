// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{key::Hash256, AccountId, Blob, LedgerKey, Sequence};
use serde::{Deserialize, Serialize};

/// One entry of a ledger's object diff: the state of `key` as of the diff's
/// ledger. An empty blob means the object was deleted in that ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDiff {
    pub key: LedgerKey,
    pub blob: Blob,
}

impl ObjectDiff {
    pub fn is_deleted(&self) -> bool {
        self.blob.is_empty()
    }
}

/// One successor-chain edge valid from a given ledger onward:
/// `succ(key) = successor` at the diff's sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessorEntry {
    pub key: LedgerKey,
    pub successor: LedgerKey,
}

/// A row of the account-transaction index. Rows are append-only per ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransactionData {
    pub account: AccountId,
    pub ledger_sequence: Sequence,
    pub transaction_index: u32,
    pub transaction_hash: Hash256,
}

/// Latest known state of an NFT as of a ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftData {
    pub token_id: Hash256,
    pub ledger_sequence: Sequence,
    pub owner: AccountId,
    pub is_burned: bool,
    /// Most recent URI, if the mint (or a later modification) carried one.
    pub uri: Option<Blob>,
}

/// A row of the NFT-transaction index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftTransactionData {
    pub token_id: Hash256,
    pub ledger_sequence: Sequence,
    pub transaction_index: u32,
    pub transaction_hash: Hash256,
}
