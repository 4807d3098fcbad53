// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Initial full-ledger load: stream every state object of one ledger from
//! upstream in parallel key ranges, write it all at that single sequence,
//! build the complete successor chain from the sorted key set, and commit
//! the range as `[sequence, sequence]`.

use anyhow::{bail, Result};
use quill_backend::BackendInterface;
use quill_types::{LedgerHeader, LedgerKey, Sequence, FIRST_KEY, LAST_KEY};
use quill_upstream::LoadBalancer;
use std::sync::Arc;
use tracing::{info, warn};

/// Load ledger `sequence` from empty. Returns the header on success;
/// `Ok(None)` means the transfer failed midway and the caller should
/// retry (the balancer will try another source).
pub async fn load_initial_ledger(
    facade: &Arc<BackendInterface>,
    balancer: &Arc<LoadBalancer>,
    sequence: Sequence,
    num_markers: u32,
) -> Result<Option<LedgerHeader>> {
    let Some(header_response) = balancer.fetch_ledger(sequence, false).await else {
        return Ok(None);
    };
    let Some(header) = LedgerHeader::from_blob(&header_response.ledger_header) else {
        bail!("upstream returned a malformed header for {}", sequence);
    };
    if header.sequence != sequence {
        bail!(
            "upstream returned header {} when asked for {}",
            header.sequence,
            sequence
        );
    }

    let Some(mut batches) = balancer.load_initial_ledger(sequence, num_markers).await
    else {
        return Ok(None);
    };

    facade.start_writes_uncached();
    let mut keys: Vec<LedgerKey> = Vec::new();
    while let Some(batch) = batches.recv().await {
        let objects = match batch {
            Ok(objects) => objects,
            Err(batch_error) => {
                warn!(
                    sequence = sequence,
                    error = %batch_error,
                    "initial ledger transfer failed"
                );
                // Abandon the write scope; rows already staged are dropped.
                return Ok(None);
            },
        };
        for object in objects {
            let Some(key) = LedgerKey::from_slice(&object.key) else {
                continue;
            };
            if object.data.is_empty() {
                continue;
            }
            keys.push(key);
            facade.write_ledger_object(key, sequence, object.data);
        }
    }

    // The markers each cover a disjoint key range, so the union sorted is
    // the full ordered key set; the chain follows directly.
    keys.sort_unstable();
    keys.dedup();
    let mut previous = FIRST_KEY;
    for key in &keys {
        facade.write_successor(previous, sequence, *key);
        previous = *key;
    }
    facade.write_successor(previous, sequence, LAST_KEY);

    facade.write_ledger(header.clone());
    info!(
        sequence = sequence,
        objects = keys.len(),
        "loaded initial ledger; committing"
    );
    if !facade.finish_writes(sequence).await? {
        // Someone else seeded the store first; treat like a conflict.
        return Ok(None);
    }
    Ok(Some(header))
}
