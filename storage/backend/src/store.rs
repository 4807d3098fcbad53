// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use async_trait::async_trait;
use quill_types::{
    AccountId, AccountTransactionData, AccountTransactionsCursor, Blob, Hash256, LedgerHeader,
    LedgerKey, LedgerObject, LedgerRange, NftData, NftTransactionData, Sequence,
    TransactionAndMetadata,
};

/// A ledger object version bound for the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectWrite {
    pub key: LedgerKey,
    pub sequence: Sequence,
    pub blob: Blob,
}

/// A successor-chain edge bound for the store: `succ(key) = successor`
/// valid from `sequence` onward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuccessorWrite {
    pub key: LedgerKey,
    pub sequence: Sequence,
    pub successor: LedgerKey,
}

/// A transaction row bound for the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionWrite {
    pub hash: Hash256,
    pub transaction: Blob,
    pub metadata: Blob,
    pub ledger_sequence: Sequence,
    pub close_time: u64,
}

/// Cursor into the NFT-transaction index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NftTransactionsCursor {
    pub ledger_sequence: Sequence,
    pub transaction_index: u32,
}

/// Typed operations over the underlying KV/columnar engine, one logical
/// table per entity. Every write is idempotent under its (key, sequence)
/// identity, which is what makes a lost writer race harmless: the peer
/// writer re-derives byte-identical rows.
///
/// Implementations: Cassandra, Postgres, and the in-memory mock.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Best-effort readiness probe plus schema setup.
    async fn open(&self) -> Result<()>;

    // ---- reads ----

    async fn fetch_ledger_by_sequence(&self, sequence: Sequence)
        -> Result<Option<LedgerHeader>>;

    async fn fetch_ledger_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeader>>;

    async fn fetch_ledger_range(&self) -> Result<Option<LedgerRange>>;

    /// Latest version of `key` with sequence <= `sequence`; `None` when no
    /// such version exists or the latest one is a tombstone.
    async fn fetch_ledger_object(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<Blob>>;

    /// Point lookups for many keys at one sequence, preserving order.
    async fn fetch_ledger_objects(
        &self,
        keys: &[LedgerKey],
        sequence: Sequence,
    ) -> Result<Vec<Option<Blob>>>;

    /// Smallest live key strictly greater than `key` at `sequence`,
    /// resolved through the versioned successor table.
    async fn fetch_successor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>>;

    /// Largest live key strictly less than `key` at `sequence`. Backends
    /// that cannot seek backwards (Cassandra) return `Unavailable`; their
    /// writers rely on the in-memory cache for this lookup.
    async fn fetch_predecessor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>>;

    /// Every object touched by ledger `sequence`, tombstones included
    /// (empty blobs). Read by the cache loader to seed chain cursors.
    async fn fetch_ledger_diff(&self, sequence: Sequence) -> Result<Vec<LedgerObject>>;

    async fn fetch_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionAndMetadata>>;

    async fn fetch_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Option<TransactionAndMetadata>>>;

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<TransactionAndMetadata>>;

    async fn fetch_all_transaction_hashes_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<Hash256>>;

    /// Scan of the account-transaction index. Newest-first unless `forward`.
    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<AccountTransactionsCursor>)>;

    /// Latest NFT state row with sequence <= `sequence`.
    async fn fetch_nft(&self, token_id: &Hash256, sequence: Sequence)
        -> Result<Option<NftData>>;

    async fn fetch_nft_transactions(
        &self,
        token_id: &Hash256,
        limit: u32,
        forward: bool,
        cursor: Option<NftTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<NftTransactionsCursor>)>;

    // ---- writes ----

    async fn write_ledger_header(&self, header: &LedgerHeader) -> Result<()>;

    async fn write_ledger_objects(&self, objects: &[ObjectWrite]) -> Result<()>;

    async fn write_successors(&self, successors: &[SuccessorWrite]) -> Result<()>;

    async fn write_transactions(&self, transactions: &[TransactionWrite]) -> Result<()>;

    async fn write_account_transactions(
        &self,
        rows: &[AccountTransactionData],
    ) -> Result<()>;

    async fn write_nfts(&self, rows: &[NftData]) -> Result<()>;

    async fn write_nft_transactions(&self, rows: &[NftTransactionData]) -> Result<()>;

    /// Conditionally advance the range tip: succeeds iff the stored tip
    /// equals `expected_prior` (or the row is absent and `expected_prior`
    /// is `None`, which also seeds the minimum). Returns whether the update
    /// took effect; `false` is the write-conflict signal.
    async fn update_ledger_range(
        &self,
        new_max: Sequence,
        expected_prior: Option<Sequence>,
    ) -> Result<bool>;

    /// Raise the range minimum after online deletion has rewritten the
    /// baseline at `new_min`.
    async fn update_ledger_range_min(&self, new_min: Sequence) -> Result<()>;

    /// Whether [`Backend::delete_before`] can run on this store. Checked
    /// before the expensive baseline rewrite of online deletion.
    fn supports_online_delete(&self) -> bool {
        true
    }

    /// Remove every row of every sequence-versioned table with
    /// sequence < `keep_min`. Bounded work per call is the implementation's
    /// concern; callers only require eventual completion.
    async fn delete_before(&self, keep_min: Sequence) -> Result<()>;
}
