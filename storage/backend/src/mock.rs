// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory backend. Selected by `database.type = mock` and used as the
//! test double everywhere: it implements the exact versioned semantics the
//! real stores provide, plus a fault hook for instrumenting single calls.

use crate::{
    error::{BackendError, Result},
    store::{
        Backend, NftTransactionsCursor, ObjectWrite, SuccessorWrite, TransactionWrite,
    },
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use quill_types::{
    AccountId, AccountTransactionData, AccountTransactionsCursor, Blob, Hash256, LedgerHeader,
    LedgerKey, LedgerObject, LedgerRange, NftData, NftTransactionData, Sequence,
    TransactionAndMetadata,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Default)]
struct MockState {
    headers: BTreeMap<Sequence, LedgerHeader>,
    hash_index: HashMap<Hash256, Sequence>,
    objects: BTreeMap<(LedgerKey, Sequence), Blob>,
    successors: BTreeMap<(LedgerKey, Sequence), LedgerKey>,
    transactions: HashMap<Hash256, TransactionAndMetadata>,
    ledger_transactions: BTreeMap<Sequence, Vec<Hash256>>,
    account_transactions: BTreeMap<(AccountId, Sequence, u32), Hash256>,
    nfts: BTreeMap<(Hash256, Sequence), NftData>,
    nft_transactions: BTreeMap<(Hash256, Sequence, u32), Hash256>,
    range: Option<LedgerRange>,
}

impl MockState {
    fn resolve_object(&self, key: &LedgerKey, sequence: Sequence) -> Option<&Blob> {
        self.objects
            .range((*key, 0)..=(*key, sequence))
            .next_back()
            .map(|(_, blob)| blob)
    }
}

#[derive(Default)]
pub struct MockBackend {
    state: RwLock<MockState>,
    faults: Mutex<VecDeque<BackendError>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next backend call to fail with `error`. Queued
    /// faults fire in order, one per call.
    pub fn inject_fault(&self, error: BackendError) {
        self.faults.lock().push_back(error);
    }

    fn check_fault(&self) -> Result<()> {
        match self.faults.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Test visibility: number of stored object versions (tombstones
    /// included).
    pub fn object_version_count(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Test visibility: number of stored successor edges.
    pub fn successor_version_count(&self) -> usize {
        self.state.read().successors.len()
    }

    /// Test visibility: resolve `succ(key)` at `sequence` from the
    /// successor table itself, the way distributed backends do (the trait
    /// method scans objects instead, serving as the oracle).
    pub fn successor_table_resolve(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Option<LedgerKey> {
        self.state
            .read()
            .successors
            .range((*key, 0)..=(*key, sequence))
            .next_back()
            .map(|(_, next)| *next)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_ledger_by_sequence(
        &self,
        sequence: Sequence,
    ) -> Result<Option<LedgerHeader>> {
        self.check_fault()?;
        Ok(self.state.read().headers.get(&sequence).cloned())
    }

    async fn fetch_ledger_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeader>> {
        self.check_fault()?;
        let state = self.state.read();
        Ok(state
            .hash_index
            .get(hash)
            .and_then(|sequence| state.headers.get(sequence))
            .cloned())
    }

    async fn fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        self.check_fault()?;
        Ok(self.state.read().range)
    }

    async fn fetch_ledger_object(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<Blob>> {
        self.check_fault()?;
        let state = self.state.read();
        Ok(state
            .resolve_object(key, sequence)
            .filter(|blob| !blob.is_empty())
            .cloned())
    }

    async fn fetch_ledger_objects(
        &self,
        keys: &[LedgerKey],
        sequence: Sequence,
    ) -> Result<Vec<Option<Blob>>> {
        self.check_fault()?;
        let state = self.state.read();
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .resolve_object(key, sequence)
                    .filter(|blob| !blob.is_empty())
                    .cloned()
            })
            .collect())
    }

    async fn fetch_successor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        self.check_fault()?;
        let state = self.state.read();
        // The mock answers for arbitrary start keys by scanning object
        // versions directly, which keeps it usable as the oracle in tests.
        let start = match key.next() {
            Some(next) => next,
            None => return Ok(None),
        };
        let mut last_checked: Option<LedgerKey> = None;
        for ((object_key, _), _) in state.objects.range((start, 0)..) {
            if last_checked == Some(*object_key) {
                continue;
            }
            last_checked = Some(*object_key);
            if state
                .resolve_object(object_key, sequence)
                .map_or(false, |blob| !blob.is_empty())
            {
                return Ok(Some(*object_key));
            }
        }
        Ok(None)
    }

    async fn fetch_predecessor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        self.check_fault()?;
        let state = self.state.read();
        let mut last_checked: Option<LedgerKey> = None;
        for ((object_key, _), _) in state.objects.range(..(*key, 0)).rev() {
            if last_checked == Some(*object_key) {
                continue;
            }
            last_checked = Some(*object_key);
            if state
                .resolve_object(object_key, sequence)
                .map_or(false, |blob| !blob.is_empty())
            {
                return Ok(Some(*object_key));
            }
        }
        Ok(None)
    }

    async fn fetch_ledger_diff(&self, sequence: Sequence) -> Result<Vec<LedgerObject>> {
        self.check_fault()?;
        let state = self.state.read();
        Ok(state
            .objects
            .iter()
            .filter(|((_, version), _)| *version == sequence)
            .map(|((key, _), blob)| LedgerObject {
                key: *key,
                blob: blob.clone(),
            })
            .collect())
    }

    async fn fetch_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionAndMetadata>> {
        self.check_fault()?;
        Ok(self.state.read().transactions.get(hash).cloned())
    }

    async fn fetch_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Option<TransactionAndMetadata>>> {
        self.check_fault()?;
        let state = self.state.read();
        Ok(hashes
            .iter()
            .map(|hash| state.transactions.get(hash).cloned())
            .collect())
    }

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<TransactionAndMetadata>> {
        self.check_fault()?;
        let state = self.state.read();
        let hashes = match state.ledger_transactions.get(&sequence) {
            Some(hashes) => hashes,
            None => return Ok(Vec::new()),
        };
        Ok(hashes
            .iter()
            .filter_map(|hash| state.transactions.get(hash).cloned())
            .collect())
    }

    async fn fetch_all_transaction_hashes_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<Hash256>> {
        self.check_fault()?;
        Ok(self
            .state
            .read()
            .ledger_transactions
            .get(&sequence)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<AccountTransactionsCursor>)> {
        self.check_fault()?;
        let state = self.state.read();
        let low = (*account, 0u32, 0u32);
        let high = (*account, Sequence::MAX, u32::MAX);
        let mut hashes: Vec<(Sequence, u32, Hash256)> = Vec::new();
        let mut next_cursor = None;

        let in_window = |sequence: Sequence, index: u32| match (forward, cursor) {
            (_, None) => true,
            (false, Some(at)) => {
                (sequence, index) < (at.ledger_sequence, at.transaction_index)
                    || (sequence, index) == (at.ledger_sequence, at.transaction_index)
            },
            (true, Some(at)) => {
                (sequence, index) >= (at.ledger_sequence, at.transaction_index)
            },
        };

        let mut push = |sequence: Sequence, index: u32, hash: Hash256| -> bool {
            if hashes.len() as u32 >= limit {
                next_cursor = Some(AccountTransactionsCursor {
                    ledger_sequence: sequence,
                    transaction_index: index,
                });
                return false;
            }
            hashes.push((sequence, index, hash));
            true
        };

        if forward {
            for (&(_, sequence, index), hash) in state.account_transactions.range(low..=high)
            {
                if !in_window(sequence, index) {
                    continue;
                }
                if !push(sequence, index, *hash) {
                    break;
                }
            }
        } else {
            for (&(_, sequence, index), hash) in
                state.account_transactions.range(low..=high).rev()
            {
                if !in_window(sequence, index) {
                    continue;
                }
                if !push(sequence, index, *hash) {
                    break;
                }
            }
        }

        let transactions = hashes
            .into_iter()
            .filter_map(|(_, _, hash)| state.transactions.get(&hash).cloned())
            .collect();
        Ok((transactions, next_cursor))
    }

    async fn fetch_nft(
        &self,
        token_id: &Hash256,
        sequence: Sequence,
    ) -> Result<Option<NftData>> {
        self.check_fault()?;
        Ok(self
            .state
            .read()
            .nfts
            .range((*token_id, 0)..=(*token_id, sequence))
            .next_back()
            .map(|(_, data)| data.clone()))
    }

    async fn fetch_nft_transactions(
        &self,
        token_id: &Hash256,
        limit: u32,
        forward: bool,
        cursor: Option<NftTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<NftTransactionsCursor>)> {
        self.check_fault()?;
        let state = self.state.read();
        let low = (*token_id, 0u32, 0u32);
        let high = (*token_id, Sequence::MAX, u32::MAX);
        let mut selected: Vec<(Sequence, u32, Hash256)> = Vec::new();
        let mut next_cursor = None;

        let in_window = |sequence: Sequence, index: u32| match (forward, cursor) {
            (_, None) => true,
            (false, Some(at)) => {
                (sequence, index) <= (at.ledger_sequence, at.transaction_index)
            },
            (true, Some(at)) => {
                (sequence, index) >= (at.ledger_sequence, at.transaction_index)
            },
        };

        let mut push = |sequence: Sequence, index: u32, hash: Hash256| -> bool {
            if selected.len() as u32 >= limit {
                next_cursor = Some(NftTransactionsCursor {
                    ledger_sequence: sequence,
                    transaction_index: index,
                });
                return false;
            }
            selected.push((sequence, index, hash));
            true
        };

        if forward {
            for (&(_, sequence, index), hash) in state.nft_transactions.range(low..=high) {
                if !in_window(sequence, index) {
                    continue;
                }
                if !push(sequence, index, *hash) {
                    break;
                }
            }
        } else {
            for (&(_, sequence, index), hash) in
                state.nft_transactions.range(low..=high).rev()
            {
                if !in_window(sequence, index) {
                    continue;
                }
                if !push(sequence, index, *hash) {
                    break;
                }
            }
        }

        let transactions = selected
            .into_iter()
            .filter_map(|(_, _, hash)| state.transactions.get(&hash).cloned())
            .collect();
        Ok((transactions, next_cursor))
    }

    async fn write_ledger_header(&self, header: &LedgerHeader) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        state.hash_index.insert(header.hash, header.sequence);
        state.headers.insert(header.sequence, header.clone());
        Ok(())
    }

    async fn write_ledger_objects(&self, objects: &[ObjectWrite]) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for object in objects {
            state
                .objects
                .insert((object.key, object.sequence), object.blob.clone());
        }
        Ok(())
    }

    async fn write_successors(&self, successors: &[SuccessorWrite]) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for successor in successors {
            state
                .successors
                .insert((successor.key, successor.sequence), successor.successor);
        }
        Ok(())
    }

    async fn write_transactions(&self, transactions: &[TransactionWrite]) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for tx in transactions {
            state.transactions.insert(
                tx.hash,
                TransactionAndMetadata {
                    transaction: tx.transaction.clone(),
                    metadata: tx.metadata.clone(),
                    ledger_sequence: tx.ledger_sequence,
                    close_time: tx.close_time,
                },
            );
            let in_ledger = state.ledger_transactions.entry(tx.ledger_sequence).or_default();
            if !in_ledger.contains(&tx.hash) {
                in_ledger.push(tx.hash);
            }
        }
        Ok(())
    }

    async fn write_account_transactions(
        &self,
        rows: &[AccountTransactionData],
    ) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for row in rows {
            state.account_transactions.insert(
                (row.account, row.ledger_sequence, row.transaction_index),
                row.transaction_hash,
            );
        }
        Ok(())
    }

    async fn write_nfts(&self, rows: &[NftData]) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for row in rows {
            state
                .nfts
                .insert((row.token_id, row.ledger_sequence), row.clone());
        }
        Ok(())
    }

    async fn write_nft_transactions(&self, rows: &[NftTransactionData]) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        for row in rows {
            state.nft_transactions.insert(
                (row.token_id, row.ledger_sequence, row.transaction_index),
                row.transaction_hash,
            );
        }
        Ok(())
    }

    async fn update_ledger_range(
        &self,
        new_max: Sequence,
        expected_prior: Option<Sequence>,
    ) -> Result<bool> {
        self.check_fault()?;
        let mut state = self.state.write();
        match (state.range, expected_prior) {
            (None, None) => {
                state.range = Some(LedgerRange::new(new_max, new_max));
                Ok(true)
            },
            (Some(range), Some(prior)) if range.max_sequence == prior => {
                state.range = Some(LedgerRange::new(range.min_sequence, new_max));
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn update_ledger_range_min(&self, new_min: Sequence) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();
        match state.range.as_mut() {
            Some(range) => {
                range.min_sequence = new_min;
                Ok(())
            },
            None => Err(BackendError::Fatal(
                "cannot raise the minimum of an empty range".to_string(),
            )),
        }
    }

    async fn delete_before(&self, keep_min: Sequence) -> Result<()> {
        self.check_fault()?;
        let mut state = self.state.write();

        let stale_headers: Vec<Sequence> = state
            .headers
            .range(..keep_min)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in stale_headers {
            if let Some(header) = state.headers.remove(&sequence) {
                state.hash_index.remove(&header.hash);
            }
            if let Some(hashes) = state.ledger_transactions.remove(&sequence) {
                for hash in hashes {
                    state.transactions.remove(&hash);
                }
            }
        }

        state.objects.retain(|(_, sequence), _| *sequence >= keep_min);
        state
            .successors
            .retain(|(_, sequence), _| *sequence >= keep_min);
        state
            .account_transactions
            .retain(|(_, sequence, _), _| *sequence >= keep_min);
        state.nfts.retain(|(_, sequence), _| *sequence >= keep_min);
        state
            .nft_transactions
            .retain(|(_, sequence, _), _| *sequence >= keep_min);
        Ok(())
    }
}
