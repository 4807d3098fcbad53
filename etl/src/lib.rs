// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! The control loop of the reporting node.
//!
//! On startup the node either streams in a full initial ledger (empty
//! store) or attaches at the persisted tip, then runs the extract /
//! transform / load pipeline, keeping the persisted range equal to the
//! network's validated range. Several reporting nodes may share one store;
//! the conditional range-tip write arbitrates so exactly one writes while
//! the rest fall back to publishing ledgers as they appear in the store.
//! A node that loses the writer role re-enters it only via restart.

mod cache_loader;
mod initial_load;
mod metrics;
mod pipeline;
mod publish;
mod transform;

pub use pipeline::{run_pipeline, PipelineOutcome, PipelineParams};
pub use publish::LedgerPublisher;
pub use transform::{transform, TransformError, TransformedLedger};

use anyhow::{bail, Result};
use quill_backend::BackendInterface;
use quill_config::QuillConfig;
use quill_subscriptions::SubscriptionManager;
use quill_types::{ObjectDiff, Sequence};
use quill_upstream::{LoadBalancer, NetworkValidatedLedgers, SourceStateReport};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};

const READ_ONLY_POLL: Duration = Duration::from_secs(1);
const PUBLISH_MAX_ATTEMPTS: u32 = 10;

/// Snapshot of the ETL's place in the world, for `server_info`-style
/// reporting.
#[derive(Clone, Debug)]
pub struct EtlStateReport {
    pub etl_sources: Vec<SourceStateReport>,
    pub is_writer: bool,
    pub read_only: bool,
    pub last_publish_age_seconds: Option<u64>,
}

pub struct ReportingEtl {
    facade: Arc<BackendInterface>,
    balancer: Arc<LoadBalancer>,
    validated: Arc<NetworkValidatedLedgers>,
    publisher: Arc<LedgerPublisher>,
    read_only: bool,
    extractor_threads: u32,
    num_markers: u32,
    start_sequence: Option<Sequence>,
    finish_sequence: Option<Sequence>,
    online_delete: Option<u32>,
    cache_config: quill_config::CacheConfig,
    is_writing: AtomicBool,
}

impl ReportingEtl {
    pub fn new(
        config: &QuillConfig,
        facade: Arc<BackendInterface>,
        balancer: Arc<LoadBalancer>,
        validated: Arc<NetworkValidatedLedgers>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Arc<Self> {
        let publisher = LedgerPublisher::new(facade.clone(), subscriptions);
        Arc::new(Self {
            facade,
            balancer,
            validated,
            publisher,
            read_only: config.read_only,
            extractor_threads: config.extractor_threads,
            num_markers: config.num_markers,
            start_sequence: config.start_sequence,
            finish_sequence: config.finish_sequence,
            online_delete: config.online_delete,
            cache_config: config.cache.clone(),
            is_writing: AtomicBool::new(false),
        })
    }

    pub fn get_info(&self) -> EtlStateReport {
        EtlStateReport {
            etl_sources: self.balancer.state_report(),
            is_writer: self.is_writing.load(Ordering::Acquire),
            read_only: self.read_only,
            last_publish_age_seconds: self
                .publisher
                .last_publish_age()
                .map(|age| age.as_secs()),
        }
    }

    /// Run until shutdown (task abort) or a fatal inconsistency.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("starting reporting etl");
        let range = self.facade.hard_fetch_ledger_range().await?;

        if self.read_only {
            if let Some(range) = range {
                cache_loader::start_cache_load(
                    self.facade.clone(),
                    self.cache_config.clone(),
                    range.max_sequence,
                )
                .await;
            }
            let next = range.map(|range| range.max_sequence + 1);
            return self.monitor_read_only(next).await;
        }

        let next_sequence = match range {
            Some(range) => {
                if self.start_sequence.is_some() {
                    bail!(
                        "start_sequence is set but the store already has ledgers \
                         [{}, {}]",
                        range.min_sequence,
                        range.max_sequence
                    );
                }
                range.max_sequence + 1
            },
            None => {
                let first = self.load_initial().await?;
                first + 1
            },
        };

        // Cache coverage starts at the last committed ledger.
        cache_loader::start_cache_load(
            self.facade.clone(),
            self.cache_config.clone(),
            next_sequence - 1,
        )
        .await;

        self.is_writing.store(true, Ordering::Release);
        let params = PipelineParams {
            start_sequence: next_sequence,
            finish_sequence: self.finish_sequence,
            extractor_threads: self.extractor_threads,
            online_delete: self.online_delete,
        };
        let (last_written, outcome) = run_pipeline(
            self.facade.clone(),
            self.balancer.clone(),
            self.validated.clone(),
            self.publisher.clone(),
            params,
        )
        .await?;
        self.is_writing.store(false, Ordering::Release);

        match outcome {
            PipelineOutcome::WriteConflict(sequence) => {
                info!(
                    sequence = sequence,
                    "another process is the writer; monitoring the store"
                );
                let next = last_written.map(|written| written + 1).unwrap_or(sequence);
                self.monitor_read_only(Some(next)).await
            },
            PipelineOutcome::ReachedFinish(sequence) => {
                info!(sequence = sequence, "finish sequence written; idling");
                Ok(())
            },
            PipelineOutcome::ShutDown => Ok(()),
        }
    }

    /// LOAD_INITIAL: wait for any validated ledger (or use the configured
    /// start), stream it in full, and commit `[seq, seq]`. Retries until
    /// a transfer completes.
    async fn load_initial(&self) -> Result<Sequence> {
        let sequence = match self.start_sequence {
            Some(sequence) => sequence,
            None => loop {
                if let Some(latest) = self.validated.latest() {
                    break latest;
                }
                self.validated
                    .wait_until_validated(1, Duration::from_secs(5))
                    .await;
            },
        };
        info!(sequence = sequence, "store is empty; loading initial ledger");
        loop {
            match initial_load::load_initial_ledger(
                &self.facade,
                &self.balancer,
                sequence,
                self.num_markers,
            )
            .await?
            {
                Some(header) => {
                    self.publisher
                        .publish_from_store(header.sequence, 1)
                        .await?;
                    return Ok(header.sequence);
                },
                None => {
                    warn!(
                        sequence = sequence,
                        "initial ledger load did not complete; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(2)).await;
                },
            }
        }
    }

    /// READ_ONLY: poll the store for ledgers some other process commits
    /// and publish each one in order. `next` of `None` means "start at
    /// whatever tip appears first".
    async fn monitor_read_only(&self, next: Option<Sequence>) -> Result<()> {
        info!("monitoring the store read-only");
        let mut next = next;
        loop {
            let range = match self.facade.fetch_ledger_range().await {
                Ok(range) => range,
                Err(range_error) => {
                    warn!(error = %range_error, "range poll failed");
                    tokio::time::sleep(READ_ONLY_POLL).await;
                    continue;
                },
            };
            if let Some(range) = range {
                let first = next.unwrap_or(range.max_sequence);
                let mut published_any = false;
                for sequence in first..=range.max_sequence {
                    if self
                        .publisher
                        .publish_from_store(sequence, PUBLISH_MAX_ATTEMPTS)
                        .await?
                    {
                        published_any = true;
                        next = Some(sequence + 1);
                        self.replay_diff_into_cache(sequence).await;
                    } else {
                        warn!(sequence = sequence, "ledger never became readable");
                        break;
                    }
                }
                if published_any {
                    continue;
                }
            }
            tokio::time::sleep(READ_ONLY_POLL).await;
        }
    }

    /// Keep the cache abreast of ledgers another process writes. Skipped
    /// when the cache is not exactly one behind (e.g. it ran ahead during
    /// a lost writer race); reads then fall through to the store.
    async fn replay_diff_into_cache(&self, sequence: Sequence) {
        let cache = self.facade.cache();
        if cache.latest_sequence() + 1 != sequence {
            return;
        }
        match self.facade.fetch_ledger_diff(sequence).await {
            Ok(diff) => {
                let diffs: Vec<ObjectDiff> = diff
                    .into_iter()
                    .map(|object| ObjectDiff {
                        key: object.key,
                        blob: object.blob,
                    })
                    .collect();
                cache.update(diffs, sequence, false);
            },
            Err(diff_error) => {
                warn!(
                    sequence = sequence,
                    error = %diff_error,
                    "could not replay the ledger diff into the cache"
                );
            },
        }
    }
}

#[cfg(test)]
mod tests;
