// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use quill_types::Sequence;
use std::time::Duration;
use tokio::sync::watch;

/// The network's validated-ledger watermark, fed by every connected
/// upstream subscription and consumed by the ETL extractors.
///
/// Only the highest observed sequence matters: validation is monotone, so
/// "wait until `seq` is validated" is "wait until the watermark reaches
/// `seq`".
pub struct NetworkValidatedLedgers {
    sender: watch::Sender<Option<Sequence>>,
}

impl Default for NetworkValidatedLedgers {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkValidatedLedgers {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Record a newly validated sequence observed on any subscription.
    pub fn push(&self, sequence: Sequence) {
        self.sender.send_if_modified(|latest| match latest {
            Some(current) if *current >= sequence => false,
            _ => {
                *latest = Some(sequence);
                true
            },
        });
    }

    /// Most recent validated sequence seen so far.
    pub fn latest(&self) -> Option<Sequence> {
        *self.sender.borrow()
    }

    /// Wait until a sequence >= `sequence` has been validated, or the
    /// timeout elapses. Returns whether the wait succeeded.
    pub async fn wait_until_validated(&self, sequence: Sequence, timeout: Duration) -> bool {
        let mut receiver = self.sender.subscribe();
        let reached = |latest: &Option<Sequence>| matches!(latest, Some(seen) if *seen >= sequence);
        if reached(&receiver.borrow()) {
            return true;
        }
        let wait = async {
            loop {
                if receiver.changed().await.is_err() {
                    return false;
                }
                if reached(&receiver.borrow()) {
                    return true;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn watermark_is_monotone() {
        let ledgers = NetworkValidatedLedgers::new();
        ledgers.push(10);
        ledgers.push(8);
        assert_eq!(ledgers.latest(), Some(10));
        ledgers.push(12);
        assert_eq!(ledgers.latest(), Some(12));
    }

    #[tokio::test]
    async fn waiters_wake_on_push() {
        let ledgers = Arc::new(NetworkValidatedLedgers::new());
        let waiter = {
            let ledgers = ledgers.clone();
            tokio::spawn(async move {
                ledgers
                    .wait_until_validated(5, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        ledgers.push(5);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out() {
        let ledgers = NetworkValidatedLedgers::new();
        ledgers.push(3);
        assert!(
            !ledgers
                .wait_until_validated(4, Duration::from_millis(20))
                .await
        );
    }
}
