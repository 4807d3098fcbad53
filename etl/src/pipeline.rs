// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! The three-stage extract/transform/load pipeline.
//!
//! Extraction fans out over `extractor_threads` workers that claim
//! sequences from a shared counter and block while the network has not
//! validated them; the bounded queue between stages is the backpressure.
//! A single transformer restores sequence order, enforces parent-hash
//! chaining, and derives successor diffs; the single writer commits each
//! ledger and publishes it. Writes happen in strictly increasing sequence
//! order.

use crate::{
    metrics::{LEDGERS_PROCESSED, STAGE_LATENCY_SECONDS},
    publish::LedgerPublisher,
    transform::{transform, TransformError, TransformedLedger},
};
use anyhow::{bail, Result};
use quill_backend::BackendInterface;
use quill_protos::ledger::v1::GetLedgerResponse;
use quill_types::{Hash256, ObjectDiff, Sequence};
use quill_upstream::{LoadBalancer, NetworkValidatedLedgers};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-extractor queue bound; the send is the extractor's backpressure.
const RAW_QUEUE_DEPTH: usize = 2;
const VALIDATION_WAIT: Duration = Duration::from_secs(30);
const MAX_PARENT_HASH_RETRIES: u32 = 3;
/// How often the writer re-checks the persisted minimum for the online
/// deletion trigger.
const DELETE_CHECK_INTERVAL: Sequence = 256;

/// Why the pipeline stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Another process won the range tip; this node must stop writing.
    WriteConflict(Sequence),
    /// The configured `finish_sequence` was written.
    ReachedFinish(Sequence),
    /// Shutdown was requested while waiting on upstream.
    ShutDown,
}

pub struct PipelineParams {
    pub start_sequence: Sequence,
    pub finish_sequence: Option<Sequence>,
    pub extractor_threads: u32,
    pub online_delete: Option<u32>,
}

/// Run extract/transform/load from `start_sequence` until a conflict, the
/// finish bound, or shutdown. Returns the last sequence written, if any.
pub async fn run_pipeline(
    facade: Arc<BackendInterface>,
    balancer: Arc<LoadBalancer>,
    validated: Arc<NetworkValidatedLedgers>,
    publisher: Arc<LedgerPublisher>,
    params: PipelineParams,
) -> Result<(Option<Sequence>, PipelineOutcome)> {
    let extractor_threads = params.extractor_threads.max(1);
    let (transformed_tx, mut transformed_rx) = mpsc::channel::<TransformedLedger>(2);

    // Sequences are striped across the extractors: worker i fetches
    // start+i, start+i+N, ... into its own bounded queue, and the
    // transformer pops the queues round-robin. Each queue's bound is the
    // backpressure; a worker cannot run ahead while its slot is full.
    let mut workers = Vec::new();
    let mut raw_queues = Vec::new();
    for worker_index in 0..extractor_threads {
        let (raw_tx, raw_rx) = mpsc::channel::<GetLedgerResponse>(RAW_QUEUE_DEPTH);
        raw_queues.push(raw_rx);
        let balancer = balancer.clone();
        let validated = validated.clone();
        let finish_sequence = params.finish_sequence;
        let mut sequence = params.start_sequence + worker_index;
        workers.push(tokio::spawn(async move {
            loop {
                if matches!(finish_sequence, Some(finish) if sequence > finish) {
                    break;
                }
                while !validated.wait_until_validated(sequence, VALIDATION_WAIT).await {
                    debug!(
                        worker = worker_index,
                        sequence = sequence,
                        "still waiting for validation"
                    );
                    if raw_tx.is_closed() {
                        return;
                    }
                }
                let timer = STAGE_LATENCY_SECONDS
                    .with_label_values(&["extract"])
                    .start_timer();
                let Some(response) = balancer.fetch_ledger(sequence, true).await else {
                    return;
                };
                timer.observe_duration();
                if raw_tx.send(response).await.is_err() {
                    return;
                }
                sequence += extractor_threads;
            }
        }));
    }

    let transformer = {
        let facade = facade.clone();
        let balancer = balancer.clone();
        let start_sequence = params.start_sequence;
        tokio::spawn(async move {
            transformer_loop(
                facade,
                balancer,
                raw_queues,
                transformed_tx,
                start_sequence,
            )
            .await
        })
    };

    // Write stage, on this task.
    let mut last_written = None;
    let mut outcome = PipelineOutcome::ShutDown;
    while let Some(ledger) = transformed_rx.recv().await {
        let sequence = ledger.header.sequence;
        let timer = STAGE_LATENCY_SECONDS
            .with_label_values(&["load"])
            .start_timer();
        let advanced = write_ledger(&facade, &ledger).await?;
        timer.observe_duration();
        if !advanced {
            LEDGERS_PROCESSED.with_label_values(&["conflict"]).inc();
            info!(sequence = sequence, "write conflict; relinquishing the writer role");
            outcome = PipelineOutcome::WriteConflict(sequence);
            break;
        }
        LEDGERS_PROCESSED.with_label_values(&["written"]).inc();
        last_written = Some(sequence);
        publisher.publish_transformed(&ledger).await;

        if let Some(keep) = params.online_delete {
            if sequence % DELETE_CHECK_INTERVAL == 0 {
                maybe_trigger_online_delete(&facade, sequence, keep).await;
            }
        }
        if matches!(params.finish_sequence, Some(finish) if sequence >= finish) {
            info!(sequence = sequence, "reached the configured finish sequence");
            outcome = PipelineOutcome::ReachedFinish(sequence);
            break;
        }
    }
    drop(transformed_rx);

    for worker in &workers {
        worker.abort();
    }
    transformer.abort();
    for worker in workers {
        let _ = worker.await;
    }
    if let Ok(Err(transform_error)) = transformer.await {
        // A fatal transformer error outranks the writer's view.
        return Err(transform_error);
    }
    Ok((last_written, outcome))
}

/// Pop raw payloads, restore sequence order, verify hash chaining (with
/// bounded refetches), derive diffs, and feed the writer. Also advances
/// the cache, so chain lookups for the next ledger see this one.
async fn transformer_loop(
    facade: Arc<BackendInterface>,
    balancer: Arc<LoadBalancer>,
    mut raw_queues: Vec<mpsc::Receiver<GetLedgerResponse>>,
    transformed_tx: mpsc::Sender<TransformedLedger>,
    start_sequence: Sequence,
) -> Result<()> {
    let mut parent_hash: Option<Hash256> = facade
        .fetch_ledger_by_sequence(start_sequence.saturating_sub(1))
        .await
        .ok()
        .flatten()
        .map(|header| header.hash);
    let mut expected = start_sequence;

    loop {
        let slot = ((expected - start_sequence) as usize) % raw_queues.len();
        let Some(mut response) = raw_queues[slot].recv().await else {
            return Ok(());
        };
        let timer = STAGE_LATENCY_SECONDS
            .with_label_values(&["transform"])
            .start_timer();
        let mut retries = 0;
        let ledger = loop {
            match transform(&facade, &response, parent_hash).await {
                Ok(ledger) => break ledger,
                Err(TransformError::ParentHashMismatch {
                    sequence,
                    expected,
                    actual,
                }) => {
                    retries += 1;
                    warn!(
                        sequence = sequence,
                        expected = %expected,
                        actual = %actual,
                        retries = retries,
                        "parent hash mismatch; refetching"
                    );
                    if retries >= MAX_PARENT_HASH_RETRIES {
                        error!(
                            sequence = sequence,
                            "persistent parent hash mismatch across sources"
                        );
                        bail!("persistent parent hash mismatch at sequence {}", sequence);
                    }
                    match balancer.fetch_ledger(sequence, true).await {
                        Some(refetched) => response = refetched,
                        None => return Ok(()),
                    }
                },
                Err(TransformError::Backend(backend_error))
                    if backend_error.is_retryable() =>
                {
                    warn!(
                        sequence = expected,
                        error = %backend_error,
                        "transient backend failure in transform; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                },
                Err(other) => bail!("transform failed at {}: {}", expected, other),
            }
        };
        timer.observe_duration();
        if ledger.header.sequence != expected {
            bail!(
                "upstream returned ledger {} when {} was requested",
                ledger.header.sequence,
                expected
            );
        }
        parent_hash = Some(ledger.header.hash);
        // The cache runs ahead of the committed store by design: the next
        // ledger's successor derivation needs this state.
        let diffs: Vec<ObjectDiff> = ledger.object_diffs.clone();
        facade.cache().update(diffs, expected, false);
        expected += 1;
        if transformed_tx.send(ledger).await.is_err() {
            return Ok(());
        }
    }
}

/// Stage every row of one transformed ledger and commit. Returns false on
/// a range-tip conflict.
pub async fn write_ledger(
    facade: &BackendInterface,
    ledger: &TransformedLedger,
) -> Result<bool, quill_backend::BackendError> {
    let sequence = ledger.header.sequence;
    facade.start_writes_uncached();
    for diff in &ledger.object_diffs {
        facade.write_ledger_object(diff.key, sequence, diff.blob.clone());
    }
    for successor in &ledger.successor_diffs {
        facade.write_successor(successor.key, sequence, successor.successor);
    }
    for tx in &ledger.transactions {
        facade.write_transaction(
            tx.hash,
            tx.ledger_sequence,
            tx.close_time,
            tx.transaction.clone(),
            tx.metadata.clone(),
        );
    }
    facade.write_account_transactions(ledger.account_tx.clone());
    facade.write_nfts(ledger.nfts.clone());
    facade.write_nft_transactions(ledger.nft_tx.clone());
    facade.write_ledger(ledger.header.clone());
    facade.finish_writes(sequence).await
}

async fn maybe_trigger_online_delete(
    facade: &Arc<BackendInterface>,
    sequence: Sequence,
    keep: u32,
) {
    let range = match facade.fetch_ledger_range().await {
        Ok(Some(range)) => range,
        _ => return,
    };
    if sequence.saturating_sub(range.min_sequence) <= keep.saturating_mul(2) {
        return;
    }
    let facade = facade.clone();
    tokio::spawn(async move {
        match facade.do_online_delete(keep).await {
            Ok(true) => info!(keep = keep, "online delete completed"),
            Ok(false) => debug!("online delete skipped"),
            Err(delete_error) => warn!(error = %delete_error, "online delete failed"),
        }
    });
}
