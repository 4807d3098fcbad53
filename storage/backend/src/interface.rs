// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! The read/write facade over the store and the in-memory cache.
//!
//! Readers get cache-first point lookups, ordered successor walks, ledger
//! pages and book-offer traversals. The ETL writer gets a per-ledger write
//! scope (`start_writes` .. `finish_writes`) whose rows become visible
//! atomically when the range tip advances, plus bounded online deletion.

use crate::{
    error::{BackendError, Result},
    metrics::{self, gauged, COMMITTED_LEDGERS, LEDGER_SEQUENCE},
    store::{
        Backend, NftTransactionsCursor, ObjectWrite, SuccessorWrite, TransactionWrite,
    },
};
use parking_lot::{Mutex, RwLock};
use quill_cache::LedgerCache;
use quill_types::{
    book::{self, DirectoryPage},
    AccountId, AccountTransactionData, AccountTransactionsCursor, Blob, BookOffersPage,
    Hash256, LedgerHeader, LedgerKey, LedgerObject, LedgerPage, LedgerRange, NftData,
    NftTransactionData, ObjectDiff, Sequence, TransactionAndMetadata, FIRST_KEY, LAST_KEY,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Upper bound on multi-key fetches and page limits, after which a request
/// is rejected rather than served.
pub const MAX_REQUEST_LIMIT: u32 = 10_000;

/// Objects rewritten per burst while online deletion collapses the baseline.
const ONLINE_DELETE_BATCH: usize = 512;

/// Message attached to pages that crossed an un-indexed region.
pub const PAGE_WARNING: &str = "Data may be incomplete";

#[derive(Default)]
struct WriteBatch {
    header: Option<LedgerHeader>,
    objects: Vec<ObjectWrite>,
    successors: Vec<SuccessorWrite>,
    transactions: Vec<TransactionWrite>,
    account_transactions: Vec<AccountTransactionData>,
    nfts: Vec<NftData>,
    nft_transactions: Vec<NftTransactionData>,
    /// The initial full-ledger load writes directly to the store and lets
    /// the configured cache-load style decide population, so it opts out.
    update_cache: bool,
}

/// See the module docs. Shared by the ETL writer and every RPC reader.
pub struct BackendInterface {
    store: Arc<dyn Backend>,
    cache: Arc<LedgerCache>,
    batch: Mutex<Option<WriteBatch>>,
    /// The writer's view of the committed range; refreshed from the store
    /// on open and on every conflict.
    committed_range: RwLock<Option<LedgerRange>>,
    deleting: AtomicBool,
    /// While online deletion rewrites the baseline, pages at or below this
    /// sequence may be incomplete and carry a warning. Zero when idle.
    unindexed_floor: AtomicU32,
}

impl BackendInterface {
    pub fn new(store: Arc<dyn Backend>, cache: Arc<LedgerCache>) -> Self {
        Self {
            store,
            cache,
            batch: Mutex::new(None),
            committed_range: RwLock::new(None),
            deleting: AtomicBool::new(false),
            unindexed_floor: AtomicU32::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<LedgerCache> {
        &self.cache
    }

    /// Probe the store, set up schema where applicable, and prime the
    /// committed-range view.
    pub async fn open(&self) -> Result<()> {
        self.store.open().await?;
        let range = self.store.fetch_ledger_range().await?;
        *self.committed_range.write() = range;
        if let Some(range) = range {
            info!(min = range.min_sequence, max = range.max_sequence, "opened backend");
        } else {
            info!("opened backend over an empty store");
        }
        Ok(())
    }

    // ---------------------------------------------------------------- reads

    pub async fn fetch_ledger_by_sequence(
        &self,
        sequence: Sequence,
    ) -> Result<Option<LedgerHeader>> {
        gauged("fetch_ledger_by_sequence", async {
            self.store.fetch_ledger_by_sequence(sequence).await
        })
        .await
    }

    pub async fn fetch_ledger_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeader>> {
        gauged("fetch_ledger_by_hash", async {
            self.store.fetch_ledger_by_hash(hash).await
        })
        .await
    }

    pub async fn fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        gauged("fetch_ledger_range", async {
            let range = self.store.fetch_ledger_range().await?;
            *self.committed_range.write() = range;
            Ok(range)
        })
        .await
    }

    /// The committed range, retried through transient store failures. Used
    /// on startup paths that cannot proceed without an answer.
    pub async fn hard_fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        loop {
            match self.fetch_ledger_range().await {
                Ok(range) => return Ok(range),
                Err(error) if error.is_retryable() => {
                    warn!(error = %error, "retrying ledger range fetch");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                },
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn fetch_latest_ledger_sequence(&self) -> Result<Option<Sequence>> {
        Ok(self
            .fetch_ledger_range()
            .await?
            .map(|range| range.max_sequence))
    }

    pub async fn fetch_ledger_object(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<Blob>> {
        gauged("fetch_ledger_object", async {
            if let Some(blob) = self.cache.get(key, sequence) {
                return Ok(Some(blob));
            }
            self.store.fetch_ledger_object(key, sequence).await
        })
        .await
    }

    pub async fn fetch_ledger_objects(
        &self,
        keys: &[LedgerKey],
        sequence: Sequence,
    ) -> Result<Vec<Option<Blob>>> {
        gauged("fetch_ledger_objects", async {
            if keys.len() as u32 > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "requested {} objects, limit is {}",
                    keys.len(),
                    MAX_REQUEST_LIMIT
                )));
            }
            let mut results: Vec<Option<Blob>> = vec![None; keys.len()];
            let mut missing = Vec::new();
            for (position, key) in keys.iter().enumerate() {
                match self.cache.get(key, sequence) {
                    Some(blob) => results[position] = Some(blob),
                    None => missing.push(position),
                }
            }
            if !missing.is_empty() {
                let missing_keys: Vec<LedgerKey> =
                    missing.iter().map(|&position| keys[position]).collect();
                let fetched = self
                    .store
                    .fetch_ledger_objects(&missing_keys, sequence)
                    .await?;
                for (position, blob) in missing.into_iter().zip(fetched) {
                    results[position] = blob;
                }
            }
            Ok(results)
        })
        .await
    }

    /// First live object strictly after `key` at `sequence`, or `None` at
    /// the end of the chain.
    pub async fn fetch_successor(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerObject>> {
        gauged("fetch_successor", async {
            self.fetch_successor_inner(key, sequence).await
        })
        .await
    }

    async fn fetch_successor_inner(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerObject>> {
        // The cache can only answer ordered queries while it holds a
        // complete snapshot covering the requested sequence.
        if self.cache.is_full()
            && sequence >= self.cache.base_sequence()
            && sequence <= self.cache.latest_sequence()
        {
            return Ok(self.cache.successor(key, sequence));
        }
        let next = match self.store.fetch_successor_key(key, sequence).await? {
            Some(next) if next != LAST_KEY => next,
            _ => return Ok(None),
        };
        let blob = self.fetch_ledger_object(&next, sequence).await?;
        match blob {
            Some(blob) => Ok(Some(LedgerObject { key: next, blob })),
            // A dangling edge can only appear if the chain invariant broke.
            None => Err(BackendError::Fatal(format!(
                "successor {} at {} resolves to a dead object",
                next, sequence
            ))),
        }
    }

    /// Last live object strictly before `key` at `sequence`. Used by the
    /// ETL transformer when deriving successor diffs.
    pub async fn fetch_predecessor(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerObject>> {
        gauged("fetch_predecessor", async {
            if self.cache.is_full()
                && sequence >= self.cache.base_sequence()
                && sequence <= self.cache.latest_sequence()
            {
                return Ok(self.cache.predecessor(key, sequence));
            }
            let previous = match self.store.fetch_predecessor_key(key, sequence).await? {
                Some(previous) if previous != FIRST_KEY => previous,
                _ => return Ok(None),
            };
            let blob = self.fetch_ledger_object(&previous, sequence).await?;
            match blob {
                Some(blob) => Ok(Some(LedgerObject {
                    key: previous,
                    blob,
                })),
                None => Err(BackendError::Fatal(format!(
                    "predecessor {} at {} resolves to a dead object",
                    previous, sequence
                ))),
            }
        })
        .await
    }

    /// Page forward through the state at `sequence` in key order.
    ///
    /// The cursor is always a key: the last one returned. Resumption walks
    /// from its successor, so a stale cursor is harmless.
    pub async fn fetch_ledger_page(
        &self,
        cursor: Option<LedgerKey>,
        sequence: Sequence,
        limit: u32,
    ) -> Result<LedgerPage> {
        gauged("fetch_ledger_page", async {
            if limit == 0 || limit > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "page limit must be in 1..={}",
                    MAX_REQUEST_LIMIT
                )));
            }
            let range = self
                .fetch_ledger_range()
                .await?
                .ok_or(BackendError::NotFound)?;
            if !range.contains(sequence) {
                return Err(BackendError::NotFound);
            }

            let mut page = LedgerPage::default();
            let mut at = cursor.unwrap_or(FIRST_KEY);
            while (page.objects.len() as u32) < limit {
                match self.fetch_successor_inner(&at, sequence).await? {
                    Some(object) => {
                        at = object.key;
                        page.objects.push(object);
                    },
                    None => {
                        at = LAST_KEY;
                        break;
                    },
                }
            }
            if at != LAST_KEY {
                page.cursor = Some(at);
            }
            let floor = self.unindexed_floor.load(Ordering::Acquire);
            if floor != 0 && sequence <= floor {
                page.warning = Some(PAGE_WARNING);
            }
            Ok(page)
        })
        .await
    }

    /// Walk the directory linked list rooted at `book_root`, resolving each
    /// page's offer keys into live offers, until the next directory falls
    /// past `quality_next(book_root)` or `limit` offers are gathered.
    ///
    /// The cursor is the key of the first directory page not yet returned
    /// (a sub-page mid-chain, or a quality tip whose chain was exhausted).
    /// Resuming at a sub-page recovers the owning chain from the page's
    /// root-index field, so no page of a long directory is skipped.
    pub async fn fetch_book_offers(
        &self,
        book_root: &LedgerKey,
        sequence: Sequence,
        limit: u32,
        cursor: Option<LedgerKey>,
    ) -> Result<BookOffersPage> {
        gauged("fetch_book_offers", async {
            if limit == 0 || limit > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "book limit must be in 1..={}",
                    MAX_REQUEST_LIMIT
                )));
            }
            let book_end = book::quality_next(book_root);
            let mut page = BookOffersPage::default();
            // `tip` is the root of the chain being walked; successor steps
            // between directories always start from it.
            let mut tip = *book_root;
            let mut directory: Option<LedgerObject> = None;
            match cursor {
                None => {
                    // The root key is the first directory when offers exist
                    // at its quality.
                    directory = self
                        .fetch_ledger_object(&tip, sequence)
                        .await?
                        .map(|blob| LedgerObject { key: tip, blob });
                },
                Some(cursor_key) => {
                    tip = cursor_key;
                    let Some(blob) = self.fetch_ledger_object(&cursor_key, sequence).await?
                    else {
                        // The resume page is gone at this sequence; there
                        // is nothing left to return.
                        return Ok(page);
                    };
                    let root = DirectoryPage::parse(&blob)
                        .ok()
                        .and_then(|parsed| parsed.root_index);
                    match root {
                        Some(root) if root != cursor_key => {
                            // Mid-chain sub-page: finish its directory
                            // before walking on from the recovered root.
                            tip = root;
                            directory = Some(LedgerObject {
                                key: cursor_key,
                                blob,
                            });
                        },
                        // A root page as cursor means its chain was fully
                        // returned; continue with its successor.
                        _ => {},
                    }
                },
            }

            'book: loop {
                let current = match directory.take() {
                    Some(current) => current,
                    None => match self.fetch_successor_inner(&tip, sequence).await? {
                        Some(object) if object.key <= book_end => {
                            tip = object.key;
                            object
                        },
                        _ => break 'book,
                    },
                };
                let mut dir_key = current.key;
                let mut dir_blob = current.blob;

                // Inner loop: follow the page chain of one directory. Page
                // keys derive from the chain root, `tip`.
                loop {
                    let parsed = DirectoryPage::parse(&dir_blob).map_err(|error| {
                        BackendError::Fatal(format!(
                            "unparseable directory {} at {}: {}",
                            dir_key, sequence, error
                        ))
                    })?;
                    let blobs = self
                        .fetch_ledger_objects(&parsed.indexes, sequence)
                        .await?;
                    for (key, blob) in parsed.indexes.iter().zip(blobs) {
                        if let Some(blob) = blob {
                            page.offers.push(LedgerObject { key: *key, blob });
                        }
                    }
                    if page.offers.len() as u32 >= limit {
                        // Resume at the next unreturned page: the chain's
                        // next sub-page, or this chain's root when it is
                        // exhausted (its successor is next).
                        page.cursor = Some(if parsed.index_next != 0 {
                            book::directory_page_key(&tip, parsed.index_next)
                        } else {
                            tip
                        });
                        break 'book;
                    }
                    if parsed.index_next == 0 {
                        break;
                    }
                    let next_key = book::directory_page_key(&tip, parsed.index_next);
                    match self.fetch_ledger_object(&next_key, sequence).await? {
                        Some(blob) => {
                            dir_key = next_key;
                            dir_blob = blob;
                        },
                        None => {
                            debug!(
                                directory = %next_key,
                                "directory chain ended on a missing page"
                            );
                            break;
                        },
                    }
                }
            }
            Ok(page)
        })
        .await
    }

    /// Objects touched by ledger `sequence`, tombstones included. Used by
    /// the cache loader to seed its parallel cursors with real chain keys.
    pub async fn fetch_ledger_diff(&self, sequence: Sequence) -> Result<Vec<LedgerObject>> {
        gauged("fetch_ledger_diff", async {
            self.store.fetch_ledger_diff(sequence).await
        })
        .await
    }

    pub async fn fetch_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionAndMetadata>> {
        gauged("fetch_transaction", async {
            self.store.fetch_transaction(hash).await
        })
        .await
    }

    pub async fn fetch_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Option<TransactionAndMetadata>>> {
        gauged("fetch_transactions", async {
            if hashes.len() as u32 > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "requested {} transactions, limit is {}",
                    hashes.len(),
                    MAX_REQUEST_LIMIT
                )));
            }
            self.store.fetch_transactions(hashes).await
        })
        .await
    }

    pub async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<TransactionAndMetadata>> {
        gauged("fetch_all_transactions_in_ledger", async {
            self.store.fetch_all_transactions_in_ledger(sequence).await
        })
        .await
    }

    pub async fn fetch_all_transaction_hashes_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<Hash256>> {
        gauged("fetch_all_transaction_hashes_in_ledger", async {
            self.store
                .fetch_all_transaction_hashes_in_ledger(sequence)
                .await
        })
        .await
    }

    pub async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<AccountTransactionsCursor>)> {
        gauged("fetch_account_transactions", async {
            if limit == 0 || limit > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "account_tx limit must be in 1..={}",
                    MAX_REQUEST_LIMIT
                )));
            }
            self.store
                .fetch_account_transactions(account, limit, forward, cursor)
                .await
        })
        .await
    }

    pub async fn fetch_nft(
        &self,
        token_id: &Hash256,
        sequence: Sequence,
    ) -> Result<Option<NftData>> {
        gauged("fetch_nft", async { self.store.fetch_nft(token_id, sequence).await }).await
    }

    pub async fn fetch_nft_transactions(
        &self,
        token_id: &Hash256,
        limit: u32,
        forward: bool,
        cursor: Option<NftTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<NftTransactionsCursor>)> {
        gauged("fetch_nft_transactions", async {
            if limit == 0 || limit > MAX_REQUEST_LIMIT {
                return Err(BackendError::InvalidRequest(format!(
                    "nft_tx limit must be in 1..={}",
                    MAX_REQUEST_LIMIT
                )));
            }
            self.store
                .fetch_nft_transactions(token_id, limit, forward, cursor)
                .await
        })
        .await
    }

    // --------------------------------------------------------------- writes

    /// Open a new per-ledger write scope. Rows staged after this call
    /// become visible atomically when `finish_writes` advances the tip.
    pub fn start_writes(&self) {
        let mut batch = self.batch.lock();
        if batch.is_some() {
            warn!("start_writes with a stale write scope open; discarding it");
        }
        *batch = Some(WriteBatch {
            update_cache: true,
            ..WriteBatch::default()
        });
    }

    /// As `start_writes`, but committed rows are not replayed into the
    /// cache. The initial full-ledger load uses this; cache population is
    /// governed separately by the configured load style.
    pub fn start_writes_uncached(&self) {
        self.start_writes();
        if let Some(batch) = self.batch.lock().as_mut() {
            batch.update_cache = false;
        }
    }

    fn with_batch(&self, apply: impl FnOnce(&mut WriteBatch)) {
        let mut guard = self.batch.lock();
        match guard.as_mut() {
            Some(batch) => apply(batch),
            None => {
                // Writes outside a scope are a programming error on the
                // single-threaded writer; surface loudly in debug builds.
                debug_assert!(false, "write issued outside a write scope");
                warn!("dropping write issued outside a write scope");
            },
        }
    }

    pub fn write_ledger(&self, header: LedgerHeader) {
        self.with_batch(|batch| batch.header = Some(header));
    }

    pub fn write_ledger_object(&self, key: LedgerKey, sequence: Sequence, blob: Blob) {
        self.with_batch(|batch| {
            batch.objects.push(ObjectWrite {
                key,
                sequence,
                blob,
            })
        });
    }

    pub fn write_successor(
        &self,
        key: LedgerKey,
        sequence: Sequence,
        successor: LedgerKey,
    ) {
        self.with_batch(|batch| {
            batch.successors.push(SuccessorWrite {
                key,
                sequence,
                successor,
            })
        });
    }

    pub fn write_transaction(
        &self,
        hash: Hash256,
        ledger_sequence: Sequence,
        close_time: u64,
        transaction: Blob,
        metadata: Blob,
    ) {
        self.with_batch(|batch| {
            batch.transactions.push(TransactionWrite {
                hash,
                transaction,
                metadata,
                ledger_sequence,
                close_time,
            })
        });
    }

    pub fn write_account_transactions(&self, rows: Vec<AccountTransactionData>) {
        self.with_batch(|batch| batch.account_transactions.extend(rows));
    }

    pub fn write_nfts(&self, rows: Vec<NftData>) {
        self.with_batch(|batch| batch.nfts.extend(rows));
    }

    pub fn write_nft_transactions(&self, rows: Vec<NftTransactionData>) {
        self.with_batch(|batch| batch.nft_transactions.extend(rows));
    }

    /// Flush the open write scope and attempt to advance the range tip to
    /// `sequence`. Returns `Ok(false)` iff the conditional tip update was
    /// lost to a concurrent writer; per-entity rows are left in place
    /// (idempotent rewrites by the winner converge to the same bytes).
    pub async fn finish_writes(&self, sequence: Sequence) -> Result<bool> {
        gauged("finish_writes", async {
            let batch = self
                .batch
                .lock()
                .take()
                .ok_or_else(|| {
                    BackendError::Fatal("finish_writes without start_writes".to_string())
                })?;
            let header = batch.header.clone().ok_or_else(|| {
                BackendError::InvalidRequest(format!(
                    "write scope for {} is missing its header",
                    sequence
                ))
            })?;
            if header.sequence != sequence {
                return Err(BackendError::InvalidRequest(format!(
                    "write scope header is for {}, finishing {}",
                    header.sequence, sequence
                )));
            }

            self.store.write_ledger_objects(&batch.objects).await?;
            self.store.write_successors(&batch.successors).await?;
            self.store.write_transactions(&batch.transactions).await?;
            self.store
                .write_account_transactions(&batch.account_transactions)
                .await?;
            self.store.write_nfts(&batch.nfts).await?;
            self.store
                .write_nft_transactions(&batch.nft_transactions)
                .await?;
            // The header is last among entity writes: a reader that can see
            // the header can see everything the header describes.
            self.store.write_ledger_header(&header).await?;

            let expected_prior = self.committed_range.read().map(|range| range.max_sequence);
            let advanced = self
                .store
                .update_ledger_range(sequence, expected_prior)
                .await?;
            if advanced {
                let mut committed = self.committed_range.write();
                *committed = Some(match *committed {
                    Some(range) => LedgerRange::new(range.min_sequence, sequence),
                    None => LedgerRange::new(sequence, sequence),
                });
                drop(committed);
                LEDGER_SEQUENCE.set(sequence as i64);
                COMMITTED_LEDGERS.with_label_values(&["committed"]).inc();
                if batch.update_cache {
                    let diffs: Vec<ObjectDiff> = batch
                        .objects
                        .iter()
                        .map(|object| ObjectDiff {
                            key: object.key,
                            blob: object.blob.clone(),
                        })
                        .collect();
                    self.cache.update(diffs, sequence, false);
                }
                debug!(sequence = sequence, "committed ledger");
            } else {
                COMMITTED_LEDGERS.with_label_values(&["conflict"]).inc();
                let truth = self.store.fetch_ledger_range().await?;
                *self.committed_range.write() = truth;
                info!(
                    sequence = sequence,
                    "lost the range tip race; another process is writing"
                );
            }
            Ok(advanced)
        })
        .await
    }

    // ------------------------------------------------------ online deletion

    /// Collapse all history below `max - num_ledgers_to_keep` into a single
    /// baseline and delete the originals. Returns whether a deletion ran.
    pub async fn do_online_delete(&self, num_ledgers_to_keep: u32) -> Result<bool> {
        if self.deleting.swap(true, Ordering::AcqRel) {
            debug!("online delete already in progress");
            return Ok(false);
        }
        let result = self.online_delete_inner(num_ledgers_to_keep).await;
        self.unindexed_floor.store(0, Ordering::Release);
        self.deleting.store(false, Ordering::Release);
        if let Err(error) = &result {
            metrics::API_ERRORS
                .with_label_values(&["do_online_delete"])
                .inc();
            warn!(error = %error, "online delete failed");
        }
        result
    }

    async fn online_delete_inner(&self, num_ledgers_to_keep: u32) -> Result<bool> {
        if !self.store.supports_online_delete() {
            return Err(BackendError::InvalidRequest(
                "the configured backend does not support online delete".to_string(),
            ));
        }
        let range = match self.fetch_ledger_range().await? {
            Some(range) => range,
            None => return Ok(false),
        };
        let keep_min = match range.max_sequence.checked_sub(num_ledgers_to_keep) {
            Some(keep_min) if keep_min > range.min_sequence => keep_min,
            _ => return Ok(false),
        };
        info!(
            keep_min = keep_min,
            max = range.max_sequence,
            "starting online delete"
        );
        self.unindexed_floor.store(keep_min, Ordering::Release);

        // Step 1: rewrite every live object at keep_min as a baseline
        // version, and rebuild the successor chain at keep_min alongside.
        let mut previous_key = FIRST_KEY;
        let mut at = FIRST_KEY;
        loop {
            let mut objects = Vec::with_capacity(ONLINE_DELETE_BATCH);
            let mut successors = Vec::with_capacity(ONLINE_DELETE_BATCH);
            let mut done = false;
            while objects.len() < ONLINE_DELETE_BATCH {
                match self.fetch_successor_inner(&at, keep_min).await? {
                    Some(object) => {
                        successors.push(SuccessorWrite {
                            key: previous_key,
                            sequence: keep_min,
                            successor: object.key,
                        });
                        previous_key = object.key;
                        at = object.key;
                        objects.push(ObjectWrite {
                            key: object.key,
                            sequence: keep_min,
                            blob: object.blob,
                        });
                    },
                    None => {
                        done = true;
                        break;
                    },
                }
            }
            if done {
                successors.push(SuccessorWrite {
                    key: previous_key,
                    sequence: keep_min,
                    successor: LAST_KEY,
                });
            }
            self.store.write_ledger_objects(&objects).await?;
            self.store.write_successors(&successors).await?;
            if done {
                break;
            }
            // Yield between bursts so readers are not starved.
            tokio::task::yield_now().await;
        }

        // Step 2: drop everything below the new baseline, in the store and
        // in the cache.
        self.store.delete_before(keep_min).await?;
        self.cache.evict_before(keep_min);

        // Step 3: publish the new minimum.
        self.store.update_ledger_range_min(keep_min).await?;
        {
            let mut committed = self.committed_range.write();
            if let Some(range) = committed.as_mut() {
                range.min_sequence = keep_min;
            }
        }
        info!(keep_min = keep_min, "online delete finished");
        Ok(true)
    }
}
