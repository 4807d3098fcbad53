// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Background population of the ledger-object cache.
//!
//! The loader walks the full state at a fixed baseline sequence across
//! parallel cursors and pushes each page as a background update; the ETL
//! writer's foreground updates interleave freely and are never shadowed.
//! Cursors are seeded from the object diffs of the most recent ledgers
//! (`cache.num_diffs`), which guarantees every cursor is a real chain key
//! that any backend can resume a successor walk from. When every cursor
//! range finishes, the cache is marked full.

use quill_backend::{BackendError, BackendInterface};
use quill_config::{CacheConfig, CacheLoadStyle};
use quill_types::{LedgerKey, ObjectDiff, Sequence, FIRST_KEY};
use std::{collections::BTreeSet, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Kick off cache population for the state at `sequence` per the
/// configured style. Returns a handle for `async` loads, `None` when the
/// load ran synchronously or not at all.
pub async fn start_cache_load(
    facade: Arc<BackendInterface>,
    config: CacheConfig,
    sequence: Sequence,
) -> Option<JoinHandle<()>> {
    match config.load {
        CacheLoadStyle::None => {
            info!("cache load disabled; ordered reads will go to the store");
            None
        },
        CacheLoadStyle::Sync => {
            load_cache(facade, config, sequence).await;
            None
        },
        CacheLoadStyle::Async => Some(tokio::spawn(load_cache(facade, config, sequence))),
    }
}

async fn load_cache(facade: Arc<BackendInterface>, config: CacheConfig, sequence: Sequence) {
    let cursors = match select_cursors(&facade, &config, sequence).await {
        Ok(cursors) => cursors,
        Err(cursor_error) => {
            warn!(error = %cursor_error, "cursor selection failed; cache stays partial");
            return;
        },
    };
    info!(
        sequence = sequence,
        cursors = cursors.len() + 1,
        page_size = config.page_fetch_size,
        "starting cache load"
    );

    // Ranges: [FIRST_KEY, c1), [c1, c2), ..., [c_n, end of chain).
    let mut starts = vec![FIRST_KEY];
    starts.extend(cursors.iter().copied());
    let mut ends: Vec<Option<LedgerKey>> = cursors.iter().copied().map(Some).collect();
    ends.push(None);

    let page_size = config.page_fetch_size.clamp(1, 2048);
    let mut tasks = Vec::with_capacity(starts.len());
    for (start, end) in starts.into_iter().zip(ends) {
        let facade = facade.clone();
        tasks.push(tokio::spawn(async move {
            load_range(facade, sequence, start, end, page_size).await
        }));
    }
    let mut loaded = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(count)) => loaded += count,
            Ok(Err(load_error)) => {
                warn!(error = %load_error, "cache load range failed; cache stays partial");
                return;
            },
            Err(join_error) => {
                warn!(error = %join_error, "cache load task died; cache stays partial");
                return;
            },
        }
    }
    facade.cache().set_full();
    info!(sequence = sequence, objects = loaded, "cache load complete");
}

/// Evenly spaced live keys out of the last `num_diffs` ledgers' diffs, at
/// most `num_markers - 1` of them (the first range starts at FIRST_KEY).
async fn select_cursors(
    facade: &BackendInterface,
    config: &CacheConfig,
    sequence: Sequence,
) -> Result<Vec<LedgerKey>, BackendError> {
    let num_markers = config.num_markers.clamp(1, 256) as usize;
    let mut keys: BTreeSet<LedgerKey> = BTreeSet::new();
    let lookback = config.num_diffs.min(sequence);
    for diff_sequence in (sequence - lookback + 1)..=sequence {
        let diff = facade.fetch_ledger_diff(diff_sequence).await?;
        for object in diff {
            if !object.blob.is_empty() {
                keys.insert(object.key);
            }
        }
    }
    let keys: Vec<LedgerKey> = keys.into_iter().collect();
    if keys.len() < num_markers || num_markers < 2 {
        return Ok(Vec::new());
    }
    let step = keys.len() / num_markers;
    Ok((1..num_markers).map(|marker| keys[marker * step]).collect())
}

/// Page one key range into the cache. The start key's own object is
/// included (page walks resume *after* their cursor). Transient store
/// errors retry in place; anything else aborts the whole load.
async fn load_range(
    facade: Arc<BackendInterface>,
    sequence: Sequence,
    start: LedgerKey,
    end: Option<LedgerKey>,
    page_size: u32,
) -> Result<usize, BackendError> {
    let mut loaded = 0usize;
    if start != FIRST_KEY {
        if let Some(blob) = facade.fetch_ledger_object(&start, sequence).await? {
            facade
                .cache()
                .update(vec![ObjectDiff { key: start, blob }], sequence, true);
            loaded += 1;
        }
    }
    let mut cursor = Some(start);
    while let Some(at) = cursor {
        let page = match facade.fetch_ledger_page(Some(at), sequence, page_size).await {
            Ok(page) => page,
            Err(page_error) if page_error.is_retryable() => {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                continue;
            },
            Err(page_error) => return Err(page_error),
        };
        let mut diffs = Vec::with_capacity(page.objects.len());
        let mut crossed_end = false;
        for object in page.objects {
            if matches!(end, Some(limit) if object.key >= limit) {
                crossed_end = true;
                break;
            }
            diffs.push(ObjectDiff {
                key: object.key,
                blob: object.blob,
            });
        }
        loaded += diffs.len();
        if !diffs.is_empty() {
            facade.cache().update(diffs, sequence, true);
        }
        cursor = if crossed_end { None } else { page.cursor };
    }
    Ok(loaded)
}
