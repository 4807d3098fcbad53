// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Publication of committed ledgers to the subscription streams. Shared by
//! the write stage (which has the transformed ledger in hand) and the
//! read-only monitor (which reads everything back from the store).

use crate::{metrics::PUBLISHED_SEQUENCE, transform::TransformedLedger};
use parking_lot::RwLock;
use quill_backend::{BackendInterface, Result};
use quill_subscriptions::{Fees, SubscriptionManager};
use quill_types::{Sequence, TransactionAndMetadata};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::transform::extract_accounts;

pub struct LedgerPublisher {
    facade: Arc<BackendInterface>,
    subscriptions: Arc<SubscriptionManager>,
    last_publish: RwLock<Option<Instant>>,
}

impl LedgerPublisher {
    pub fn new(
        facade: Arc<BackendInterface>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            facade,
            subscriptions,
            last_publish: RwLock::new(None),
        })
    }

    pub fn last_publish_age(&self) -> Option<Duration> {
        self.last_publish.read().map(|at| at.elapsed())
    }

    fn mark_published(&self, sequence: Sequence) {
        *self.last_publish.write() = Some(Instant::now());
        PUBLISHED_SEQUENCE.set(sequence as i64);
    }

    async fn validated_range_string(&self) -> String {
        match self.facade.fetch_ledger_range().await {
            Ok(Some(range)) => range.to_string(),
            _ => String::new(),
        }
    }

    /// Publish a ledger the write stage just committed.
    pub async fn publish_transformed(&self, ledger: &TransformedLedger) {
        let range = self.validated_range_string().await;
        self.subscriptions.publish_ledger(
            &ledger.header,
            &Fees::default(),
            &range,
            ledger.txn_count(),
        );
        for tx in &ledger.transactions {
            let affected = ledger.accounts_of(&tx.hash);
            self.subscriptions.publish_transaction(
                &TransactionAndMetadata {
                    transaction: tx.transaction.clone(),
                    metadata: tx.metadata.clone(),
                    ledger_sequence: tx.ledger_sequence,
                    close_time: tx.close_time,
                },
                &affected,
            );
        }
        self.mark_published(ledger.header.sequence);
    }

    /// Publish a ledger another process committed, reading it back from
    /// the store. Retries reads up to `max_attempts` times, one second
    /// apart, since the writer may still be racing ahead of replication.
    pub async fn publish_from_store(
        &self,
        sequence: Sequence,
        max_attempts: u32,
    ) -> Result<bool> {
        for attempt in 0..max_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            let header = match self.facade.fetch_ledger_by_sequence(sequence).await {
                Ok(Some(header)) => header,
                Ok(None) => continue,
                Err(fetch_error) if fetch_error.is_retryable() => {
                    warn!(
                        sequence = sequence,
                        error = %fetch_error,
                        "retrying ledger read for publication"
                    );
                    continue;
                },
                Err(fetch_error) => return Err(fetch_error),
            };
            let transactions = self
                .facade
                .fetch_all_transactions_in_ledger(sequence)
                .await?;
            let range = self.validated_range_string().await;
            self.subscriptions.publish_ledger(
                &header,
                &Fees::default(),
                &range,
                transactions.len() as u32,
            );
            for tx in &transactions {
                let affected = extract_accounts(&tx.metadata);
                self.subscriptions.publish_transaction(tx, &affected);
            }
            self.mark_published(sequence);
            info!(sequence = sequence, "published ledger from the store");
            return Ok(true);
        }
        Ok(false)
    }
}
