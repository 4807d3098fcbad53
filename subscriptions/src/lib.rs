// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Downstream subscription fan-out.
//!
//! The manager keys weak subscriber handles by stream and by account. A
//! session owns its [`Subscriber`] strongly; when it drops, the manager
//! prunes the dead handle on the next publish rather than being notified.
//! Publishing serializes the event once, releases the registry lock, and
//! only then pushes into subscriber queues, so no lock is held across I/O.

use parking_lot::RwLock;
use quill_types::{AccountId, LedgerHeader, TransactionAndMetadata};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tokio::sync::mpsc;
use tracing::debug;

/// Handle held by a session. Events arrive on the paired receiver as
/// serialized JSON strings.
pub struct Subscriber {
    queue: mpsc::UnboundedSender<String>,
}

impl Subscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { queue }), receiver)
    }

    fn send(&self, message: &str) -> bool {
        self.queue.send(message.to_string()).is_ok()
    }
}

/// Base fee and reserve levels carried on ledger events.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fees {
    pub base: u64,
    pub reference: u64,
    pub reserve_base: u64,
    pub reserve_increment: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Stream {
    Ledgers,
    Transactions,
    TransactionsProposed,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Weak<Subscriber>>,
}

impl Registry {
    fn add(&mut self, subscriber: &Arc<Subscriber>) {
        if self
            .subscribers
            .iter()
            .any(|existing| existing.as_ptr() == Arc::as_ptr(subscriber))
        {
            return;
        }
        self.subscribers.push(Arc::downgrade(subscriber));
    }

    fn remove(&mut self, subscriber: &Arc<Subscriber>) {
        self.subscribers
            .retain(|existing| existing.as_ptr() != Arc::as_ptr(subscriber));
    }

    fn collect_live(&self) -> (Vec<Arc<Subscriber>>, bool) {
        let mut live = Vec::with_capacity(self.subscribers.len());
        let mut any_dead = false;
        for weak in &self.subscribers {
            match weak.upgrade() {
                Some(strong) => live.push(strong),
                None => any_dead = true,
            }
        }
        (live, any_dead)
    }

    fn prune(&mut self) {
        self.subscribers.retain(|weak| weak.strong_count() > 0);
    }
}

/// See the module docs.
#[derive(Default)]
pub struct SubscriptionManager {
    streams: HashMap<Stream, RwLock<Registry>>,
    accounts: RwLock<HashMap<AccountId, Registry>>,
    proposed_accounts: RwLock<HashMap<AccountId, Registry>>,
}

impl SubscriptionManager {
    pub fn new() -> Arc<Self> {
        let mut streams = HashMap::new();
        streams.insert(Stream::Ledgers, RwLock::new(Registry::default()));
        streams.insert(Stream::Transactions, RwLock::new(Registry::default()));
        streams.insert(
            Stream::TransactionsProposed,
            RwLock::new(Registry::default()),
        );
        Arc::new(Self {
            streams,
            accounts: RwLock::new(HashMap::new()),
            proposed_accounts: RwLock::new(HashMap::new()),
        })
    }

    fn stream(&self, stream: Stream) -> &RwLock<Registry> {
        // all three registries are inserted in new()
        self.streams.get(&stream).expect("stream registry exists")
    }

    pub fn sub_ledger(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::Ledgers).write().add(subscriber);
    }

    pub fn unsub_ledger(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::Ledgers).write().remove(subscriber);
    }

    pub fn sub_transactions(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::Transactions).write().add(subscriber);
    }

    pub fn unsub_transactions(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::Transactions).write().remove(subscriber);
    }

    pub fn sub_proposed_transactions(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::TransactionsProposed)
            .write()
            .add(subscriber);
    }

    pub fn unsub_proposed_transactions(&self, subscriber: &Arc<Subscriber>) {
        self.stream(Stream::TransactionsProposed)
            .write()
            .remove(subscriber);
    }

    pub fn sub_account(&self, account: AccountId, subscriber: &Arc<Subscriber>) {
        self.accounts
            .write()
            .entry(account)
            .or_default()
            .add(subscriber);
    }

    pub fn unsub_account(&self, account: &AccountId, subscriber: &Arc<Subscriber>) {
        let mut accounts = self.accounts.write();
        if let Some(registry) = accounts.get_mut(account) {
            registry.remove(subscriber);
            if registry.subscribers.is_empty() {
                accounts.remove(account);
            }
        }
    }

    pub fn sub_proposed_account(&self, account: AccountId, subscriber: &Arc<Subscriber>) {
        self.proposed_accounts
            .write()
            .entry(account)
            .or_default()
            .add(subscriber);
    }

    pub fn unsub_proposed_account(&self, account: &AccountId, subscriber: &Arc<Subscriber>) {
        let mut accounts = self.proposed_accounts.write();
        if let Some(registry) = accounts.get_mut(account) {
            registry.remove(subscriber);
            if registry.subscribers.is_empty() {
                accounts.remove(account);
            }
        }
    }

    fn publish_to_stream(&self, stream: Stream, message: &str) -> usize {
        let (live, any_dead) = self.stream(stream).read().collect_live();
        if any_dead {
            self.stream(stream).write().prune();
        }
        let mut delivered = 0;
        for subscriber in live {
            if subscriber.send(message) {
                delivered += 1;
            }
        }
        delivered
    }

    fn publish_to_accounts(
        &self,
        registry: &RwLock<HashMap<AccountId, Registry>>,
        affected: &[AccountId],
        message: &str,
    ) {
        let mut live = Vec::new();
        let mut any_dead = false;
        {
            let accounts = registry.read();
            for account in affected {
                if let Some(entry) = accounts.get(account) {
                    let (mut entry_live, entry_dead) = entry.collect_live();
                    live.append(&mut entry_live);
                    any_dead |= entry_dead;
                }
            }
        }
        if any_dead {
            let mut accounts = registry.write();
            for account in affected {
                if let Some(entry) = accounts.get_mut(account) {
                    entry.prune();
                }
            }
        }
        // A session subscribed to several affected accounts gets one copy.
        live.sort_by_key(|subscriber| Arc::as_ptr(subscriber) as usize);
        live.dedup_by(|a, b| Arc::ptr_eq(a, b));
        for subscriber in live {
            subscriber.send(message);
        }
    }

    /// Publish a committed ledger to the ledgers stream.
    pub fn publish_ledger(
        &self,
        header: &LedgerHeader,
        fees: &Fees,
        validated_ledgers: &str,
        txn_count: u32,
    ) {
        let message = json!({
            "type": "ledgerClosed",
            "ledger_index": header.sequence,
            "ledger_hash": header.hash.to_string(),
            "ledger_time": header.close_time,
            "fee_base": fees.base,
            "fee_ref": fees.reference,
            "reserve_base": fees.reserve_base,
            "reserve_inc": fees.reserve_increment,
            "validated_ledgers": validated_ledgers,
            "txn_count": txn_count,
        })
        .to_string();
        let delivered = self.publish_to_stream(Stream::Ledgers, &message);
        debug!(
            sequence = header.sequence,
            subscribers = delivered,
            "published ledger"
        );
    }

    /// Publish a committed transaction to the transactions stream and to
    /// every subscriber of an affected account.
    pub fn publish_transaction(
        &self,
        transaction: &TransactionAndMetadata,
        affected: &[AccountId],
    ) {
        let message = json!({
            "type": "transaction",
            "validated": true,
            "ledger_index": transaction.ledger_sequence,
            "transaction": hex::encode_upper(&transaction.transaction),
            "meta": hex::encode_upper(&transaction.metadata),
        })
        .to_string();
        self.publish_to_stream(Stream::Transactions, &message);
        self.publish_to_accounts(&self.accounts, affected, &message);
    }

    /// Relay a proposed transaction observed on the designated forwarder.
    /// `affected` accounts come from the payload when the upstream includes
    /// them; stream subscribers receive the raw payload either way.
    pub fn forward_proposed_transaction(
        &self,
        payload: &serde_json::Value,
        affected: &[AccountId],
    ) {
        let message = payload.to_string();
        self.publish_to_stream(Stream::TransactionsProposed, &message);
        self.publish_to_accounts(&self.proposed_accounts, affected, &message);
    }

    /// Subscriber counts per stream, for state reports.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.stream(Stream::Ledgers).read().subscribers.len(),
            self.stream(Stream::Transactions).read().subscribers.len(),
            self.stream(Stream::TransactionsProposed)
                .read()
                .subscribers
                .len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_some};
    use quill_types::{Hash256, Sequence};

    fn header(sequence: Sequence) -> LedgerHeader {
        LedgerHeader {
            sequence,
            hash: Hash256::from(1u64),
            ..LedgerHeader::default()
        }
    }

    #[tokio::test]
    async fn ledger_events_reach_stream_subscribers() {
        let manager = SubscriptionManager::new();
        let (subscriber, mut receiver) = Subscriber::new();
        manager.sub_ledger(&subscriber);

        manager.publish_ledger(&header(5), &Fees::default(), "3-5", 2);
        let message = assert_some!(receiver.recv().await);
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["type"], "ledgerClosed");
        assert_eq!(parsed["ledger_index"], 5);
        assert_eq!(parsed["validated_ledgers"], "3-5");
        assert_eq!(parsed["txn_count"], 2);

        manager.unsub_ledger(&subscriber);
        manager.publish_ledger(&header(6), &Fees::default(), "3-6", 0);
        assert_none!(receiver.try_recv().ok());
    }

    #[tokio::test]
    async fn transactions_fan_out_to_accounts_once() {
        let manager = SubscriptionManager::new();
        let (subscriber, mut receiver) = Subscriber::new();
        let alice = AccountId::from(1u64);
        let bob = AccountId::from(2u64);
        // subscribed to both affected accounts; one copy expected
        manager.sub_account(alice, &subscriber);
        manager.sub_account(bob, &subscriber);

        let transaction = TransactionAndMetadata {
            transaction: b"t".to_vec(),
            metadata: b"m".to_vec(),
            ledger_sequence: 9,
            close_time: 0,
        };
        manager.publish_transaction(&transaction, &[alice, bob]);
        assert_some!(receiver.recv().await);
        assert_none!(receiver.try_recv().ok());
    }

    #[tokio::test]
    async fn dropped_sessions_are_pruned_on_publish() {
        let manager = SubscriptionManager::new();
        let (subscriber, receiver) = Subscriber::new();
        manager.sub_transactions(&subscriber);
        assert_eq!(manager.counts().1, 1);

        drop(receiver);
        drop(subscriber);
        let transaction = TransactionAndMetadata::default();
        manager.publish_transaction(&transaction, &[]);
        assert_eq!(manager.counts().1, 0);
    }

    #[tokio::test]
    async fn proposed_payloads_are_relayed_verbatim() {
        let manager = SubscriptionManager::new();
        let (subscriber, mut receiver) = Subscriber::new();
        manager.sub_proposed_transactions(&subscriber);

        let payload = json!({"type": "transaction", "status": "proposed", "id": 42});
        manager.forward_proposed_transaction(&payload, &[]);
        let message = assert_some!(receiver.recv().await);
        assert_eq!(serde_json::from_str::<serde_json::Value>(&message).unwrap(), payload);
    }
}
