// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Versioned in-memory cache of ledger state objects.
//!
//! The cache maps each 256 bit key to a small list of `(sequence, blob)`
//! versions, newest first, and answers point lookups and ordered
//! successor/predecessor navigation without touching the backend. It is
//! filled two ways at once: the ETL writer applies each committed ledger's
//! diff in sequence order, and an optional background loader walks a full
//! ledger snapshot underneath those updates. A background insert never
//! shadows a version the writer has already placed.

use parking_lot::RwLock;
use quill_types::{Blob, LedgerKey, LedgerObject, ObjectDiff, Sequence};
use std::{
    collections::BTreeMap,
    ops::Bound::{Excluded, Unbounded},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Diffs applied per exclusive-lock acquisition on background updates; a
/// page from the loader (hundreds of objects) must not starve readers for
/// its full length.
const BACKGROUND_CHUNK: usize = 64;

#[derive(Clone, Debug)]
struct CacheEntry {
    sequence: Sequence,
    blob: Blob,
}

impl CacheEntry {
    fn is_deleted(&self) -> bool {
        self.blob.is_empty()
    }
}

#[derive(Default)]
struct CacheInner {
    /// Per key version list, descending by sequence.
    map: BTreeMap<LedgerKey, Vec<CacheEntry>>,
    latest_sequence: Sequence,
    /// Earliest sequence the cache has coverage for: the background-load
    /// baseline, or the first foreground update on caches never bulk
    /// loaded. Ordered queries below this cannot be answered.
    base_sequence: Sequence,
    /// Keys whose newest version is live.
    live_count: usize,
}

impl CacheInner {
    /// Newest version with sequence <= `sequence`, if any.
    fn version_at(&self, key: &LedgerKey, sequence: Sequence) -> Option<&CacheEntry> {
        self.map
            .get(key)?
            .iter()
            .find(|entry| entry.sequence <= sequence)
    }

    fn apply_foreground(&mut self, diff: ObjectDiff, sequence: Sequence) {
        let versions = self.map.entry(diff.key).or_default();
        let was_live = versions.first().map_or(false, |head| !head.is_deleted());
        let is_live = !diff.blob.is_empty();
        versions.insert(
            0,
            CacheEntry {
                sequence,
                blob: diff.blob,
            },
        );
        match (was_live, is_live) {
            (false, true) => self.live_count += 1,
            (true, false) => self.live_count -= 1,
            _ => {},
        }
    }

    /// Insert a background-loaded version. The entry slots in below any
    /// newer version the writer has placed; it never reorders or replaces
    /// one, and a version at the same sequence wins over the loader.
    fn apply_background(&mut self, diff: ObjectDiff, sequence: Sequence) {
        let versions = self.map.entry(diff.key).or_default();
        let position = versions
            .iter()
            .position(|entry| entry.sequence <= sequence)
            .unwrap_or(versions.len());
        if versions
            .get(position)
            .map_or(false, |entry| entry.sequence == sequence)
        {
            return;
        }
        let is_live = !diff.blob.is_empty();
        let becomes_head = position == 0;
        versions.insert(
            position,
            CacheEntry {
                sequence,
                blob: diff.blob,
            },
        );
        if becomes_head && is_live {
            self.live_count += 1;
        }
    }
}

/// See the module docs. One instance is shared between the ETL writer, the
/// background loader and every reader.
pub struct LedgerCache {
    inner: RwLock<CacheInner>,
    full: AtomicBool,
    disabled: AtomicBool,
    object_requests: AtomicU64,
    object_hits: AtomicU64,
    successor_requests: AtomicU64,
    successor_hits: AtomicU64,
}

impl Default for LedgerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            full: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            object_requests: AtomicU64::new(0),
            object_hits: AtomicU64::new(0),
            successor_requests: AtomicU64::new(0),
            successor_hits: AtomicU64::new(0),
        }
    }

    /// A disabled cache misses on every read and drops every update. Used on
    /// nodes that never serve reads, to save the memory.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Marks the background load complete: from here on a miss means the
    /// object does not exist at that sequence, not merely "not cached".
    pub fn set_full(&self) {
        self.full.store(true, Ordering::Release);
    }

    pub fn is_full(&self) -> bool {
        !self.is_disabled() && self.full.load(Ordering::Acquire)
    }

    pub fn latest_sequence(&self) -> Sequence {
        self.inner.read().latest_sequence
    }

    /// Earliest sequence with full coverage once the cache is full.
    pub fn base_sequence(&self) -> Sequence {
        self.inner.read().base_sequence
    }

    /// Number of keys live at the latest cached sequence.
    pub fn size(&self) -> usize {
        self.inner.read().live_count
    }

    /// Apply one batch of object diffs.
    ///
    /// Foreground batches come from the ETL writer in strict sequence order:
    /// `sequence` must be exactly one past the latest applied (or the cache
    /// must be empty), it advances the latest sequence, and the whole batch
    /// becomes visible atomically under one write-lock acquisition.
    ///
    /// Background batches come from the initial full load at a fixed
    /// baseline; they neither advance the latest sequence nor shadow newer
    /// versions, and a full page is applied a small chunk per lock
    /// acquisition so readers and the writer are never blocked behind an
    /// entire page.
    pub fn update(&self, diffs: Vec<ObjectDiff>, sequence: Sequence, is_background: bool) {
        if self.is_disabled() {
            return;
        }
        if !is_background {
            let mut inner = self.inner.write();
            assert!(
                inner.latest_sequence == 0 || sequence == inner.latest_sequence + 1,
                "cache update out of order: latest {} incoming {}",
                inner.latest_sequence,
                sequence,
            );
            inner.latest_sequence = sequence;
            if inner.base_sequence == 0 {
                inner.base_sequence = sequence;
            }
            for diff in diffs {
                inner.apply_foreground(diff, sequence);
            }
            return;
        }

        let mut chunk = diffs;
        loop {
            let rest = if chunk.len() > BACKGROUND_CHUNK {
                chunk.split_off(BACKGROUND_CHUNK)
            } else {
                Vec::new()
            };
            {
                let mut inner = self.inner.write();
                if inner.latest_sequence == 0 {
                    inner.latest_sequence = sequence;
                }
                if inner.base_sequence == 0 || sequence < inner.base_sequence {
                    inner.base_sequence = sequence;
                }
                for diff in chunk {
                    inner.apply_background(diff, sequence);
                }
            }
            if rest.is_empty() {
                break;
            }
            chunk = rest;
        }
    }

    /// The object's blob at `sequence`, if the cache can prove it was live.
    /// Returns `None` on tombstones, on missing versions, and (while not yet
    /// full) on keys the cache has simply not seen.
    pub fn get(&self, key: &LedgerKey, sequence: Sequence) -> Option<Blob> {
        if self.is_disabled() {
            return None;
        }
        self.object_requests.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read();
        if sequence > inner.latest_sequence {
            return None;
        }
        let entry = inner.version_at(key, sequence)?;
        if entry.is_deleted() {
            return None;
        }
        self.object_hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.blob.clone())
    }

    /// First live object with key strictly greater than `key`, at `sequence`.
    /// Only meaningful once the cache is full; callers treat `None` before
    /// that as a miss, not as "end of chain".
    pub fn successor(&self, key: &LedgerKey, sequence: Sequence) -> Option<LedgerObject> {
        if self.is_disabled() {
            return None;
        }
        self.successor_requests.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read();
        if sequence > inner.latest_sequence {
            return None;
        }
        for (candidate, _) in inner.map.range((Excluded(*key), Unbounded)) {
            if let Some(entry) = inner.version_at(candidate, sequence) {
                if !entry.is_deleted() {
                    self.successor_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(LedgerObject {
                        key: *candidate,
                        blob: entry.blob.clone(),
                    });
                }
            }
        }
        None
    }

    /// First live object with key strictly less than `key`, at `sequence`.
    pub fn predecessor(&self, key: &LedgerKey, sequence: Sequence) -> Option<LedgerObject> {
        if self.is_disabled() {
            return None;
        }
        self.successor_requests.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read();
        if sequence > inner.latest_sequence {
            return None;
        }
        for (candidate, _) in inner.map.range(..*key).rev() {
            if let Some(entry) = inner.version_at(candidate, sequence) {
                if !entry.is_deleted() {
                    self.successor_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(LedgerObject {
                        key: *candidate,
                        blob: entry.blob.clone(),
                    });
                }
            }
        }
        None
    }

    /// Collapse history below `keep_min` after online deletion: each key's
    /// newest version at or below the baseline is re-stamped to `keep_min`
    /// (dropped if it was a tombstone) and older versions are discarded, so
    /// reads below the baseline miss just like they do on the store.
    pub fn evict_before(&self, keep_min: Sequence) {
        if self.is_disabled() {
            return;
        }
        let mut inner = self.inner.write();
        inner.map.retain(|_, versions| {
            if let Some(position) = versions
                .iter()
                .position(|entry| entry.sequence <= keep_min)
            {
                versions.truncate(position + 1);
                if versions[position].is_deleted() {
                    versions.pop();
                } else {
                    versions[position].sequence = keep_min;
                }
            }
            !versions.is_empty()
        });
        if inner.base_sequence < keep_min {
            inner.base_sequence = keep_min;
        }
    }

    pub fn object_hit_rate(&self) -> f64 {
        let requests = self.object_requests.load(Ordering::Relaxed);
        if requests == 0 {
            return 1.0;
        }
        self.object_hits.load(Ordering::Relaxed) as f64 / requests as f64
    }

    pub fn successor_hit_rate(&self) -> f64 {
        let requests = self.successor_requests.load(Ordering::Relaxed);
        if requests == 0 {
            return 1.0;
        }
        self.successor_hits.load(Ordering::Relaxed) as f64 / requests as f64
    }
}

#[cfg(test)]
mod tests;
