// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! The pool over every configured upstream source. High-level operations
//! pick a random starting source and lap the pool until one succeeds,
//! sleeping between laps; proposed-transaction streams are deduplicated by
//! designating exactly one connected source as the forwarder.

use crate::{
    message::StreamMessage,
    source::{ProposedRelay, SourceError, UpstreamSource},
    validated::NetworkValidatedLedgers,
};
use quill_config::EtlSourceConfig;
use quill_protos::ledger::v1::{GetLedgerResponse, RawLedgerObject};
use quill_subscriptions::SubscriptionManager;
use quill_types::Sequence;
use rand::Rng;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

const LAP_PAUSE: Duration = Duration::from_secs(2);

/// Per-source snapshot for state reports (`server_info` style output).
#[derive(Clone, Debug)]
pub struct SourceStateReport {
    pub ip: String,
    pub ws_port: u16,
    pub grpc_port: u16,
    pub connected: bool,
    pub paused: bool,
    pub validated_range: String,
    pub last_message_age_secs: Option<u64>,
    pub forwarding: bool,
}

pub struct LoadBalancer {
    sources: Vec<Arc<UpstreamSource>>,
    subscriptions: Arc<SubscriptionManager>,
    shutdown: AtomicBool,
}

impl LoadBalancer {
    pub fn new(
        configs: &[EtlSourceConfig],
        subscriptions: Arc<SubscriptionManager>,
    ) -> Arc<Self> {
        let sources = configs
            .iter()
            .enumerate()
            .map(|(index, config)| Arc::new(UpstreamSource::new(index, config)))
            .collect();
        Arc::new(Self {
            sources,
            subscriptions,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Start every source's subscription task. Handles are returned for
    /// the caller to abort on shutdown.
    pub fn spawn_subscriptions(
        self: &Arc<Self>,
        validated_ledgers: Arc<NetworkValidatedLedgers>,
    ) -> Vec<JoinHandle<()>> {
        let relay: Arc<dyn ProposedRelay> = Arc::new(ForwarderGate {
            balancer: Arc::downgrade(self),
        });
        self.sources
            .iter()
            .map(|source| {
                tokio::spawn(source.clone().run_subscription(
                    validated_ledgers.clone(),
                    relay.clone(),
                ))
            })
            .collect()
    }

    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Index of the designated forwarder: the first connected source in
    /// insertion order. Proposed-transaction traffic from any other source
    /// is dropped, which keeps downstream fan-out single-copy.
    pub fn forwarder_index(&self) -> Option<usize> {
        self.sources
            .iter()
            .position(|source| source.is_connected())
    }

    pub fn state_report(&self) -> Vec<SourceStateReport> {
        let forwarder = self.forwarder_index();
        self.sources
            .iter()
            .map(|source| SourceStateReport {
                ip: source.ip().to_string(),
                ws_port: source.ws_port(),
                grpc_port: source.grpc_port(),
                connected: source.is_connected(),
                paused: source.is_paused(),
                validated_range: source.validated_range().to_string(),
                last_message_age_secs: source
                    .last_message_age()
                    .map(|age| age.as_secs()),
                forwarding: forwarder == Some(source.index()),
            })
            .collect()
    }

    /// Candidate order for one lap: a random start, then the rest in ring
    /// order, skipping paused sources.
    fn lap_order(&self) -> Vec<Arc<UpstreamSource>> {
        let len = self.sources.len();
        if len == 0 {
            return Vec::new();
        }
        let start = rand::thread_rng().gen_range(0, len);
        (0..len)
            .map(|offset| self.sources[(start + offset) % len].clone())
            .filter(|source| !source.is_paused())
            .collect()
    }

    /// Fetch ledger `sequence` from any source advertising it. Laps the
    /// pool until a source succeeds or shutdown; `None` only on shutdown.
    pub async fn fetch_ledger(
        &self,
        sequence: Sequence,
        get_objects: bool,
    ) -> Option<GetLedgerResponse> {
        loop {
            for source in self.lap_order() {
                if self.is_shutting_down() {
                    return None;
                }
                if !source.has_ledger(sequence) {
                    debug!(
                        source = source.ip(),
                        sequence = sequence,
                        "source does not advertise ledger"
                    );
                    continue;
                }
                match source.fetch_ledger(sequence, get_objects).await {
                    Ok(response) => return Some(response),
                    Err(error) => {
                        warn!(
                            source = source.ip(),
                            sequence = sequence,
                            error = %error,
                            "ledger fetch failed; trying next source"
                        );
                    },
                }
            }
            if self.is_shutting_down() {
                return None;
            }
            tokio::time::sleep(LAP_PAUSE).await;
        }
    }

    /// Open a full-state download of ledger `sequence` on any willing
    /// source. `None` only on shutdown.
    pub async fn load_initial_ledger(
        &self,
        sequence: Sequence,
        num_markers: u32,
    ) -> Option<mpsc::Receiver<Result<Vec<RawLedgerObject>, SourceError>>> {
        loop {
            for source in self.lap_order() {
                if self.is_shutting_down() {
                    return None;
                }
                if !source.has_ledger(sequence) {
                    continue;
                }
                match source.load_initial_ledger(sequence, num_markers).await {
                    Ok(receiver) => {
                        info!(
                            source = source.ip(),
                            sequence = sequence,
                            num_markers = num_markers,
                            "streaming initial ledger"
                        );
                        return Some(receiver);
                    },
                    Err(error) => {
                        warn!(
                            source = source.ip(),
                            error = %error,
                            "initial ledger load failed; trying next source"
                        );
                    },
                }
            }
            if self.is_shutting_down() {
                return None;
            }
            tokio::time::sleep(LAP_PAUSE).await;
        }
    }

    /// Proxy an opaque request to any responsive source. Unlike extraction,
    /// forwarding gives up after one lap: the caller is an interactive
    /// client that would rather see an error than wait forever.
    pub async fn forward_request(&self, request: &Value) -> Result<Value, SourceError> {
        let mut last_error = SourceError::Shutdown;
        for source in self.lap_order() {
            if self.is_shutting_down() {
                return Err(SourceError::Shutdown);
            }
            match source.forward_request(request).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    debug!(source = source.ip(), error = %error, "forward failed");
                    last_error = error;
                },
            }
        }
        Err(last_error)
    }
}

/// Applies the designated-forwarder rule to proposed traffic before it
/// reaches the subscription manager.
struct ForwarderGate {
    balancer: std::sync::Weak<LoadBalancer>,
}

impl ProposedRelay for ForwarderGate {
    fn relay(&self, source_index: usize, payload: Value) {
        let Some(balancer) = self.balancer.upgrade() else {
            return;
        };
        if balancer.forwarder_index() != Some(source_index) {
            return;
        }
        let affected = StreamMessage::affected_accounts(&payload);
        balancer
            .subscriptions
            .forward_proposed_transaction(&payload, &affected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_some};
    use quill_subscriptions::Subscriber;

    fn balancer_with_two_sources() -> Arc<LoadBalancer> {
        let configs = vec![
            EtlSourceConfig {
                ip: "10.0.0.1".parse().unwrap(),
                ws_port: 6006,
                grpc_port: 50051,
                cache: Vec::new(),
            },
            EtlSourceConfig {
                ip: "10.0.0.2".parse().unwrap(),
                ws_port: 6006,
                grpc_port: 50051,
                cache: Vec::new(),
            },
        ];
        LoadBalancer::new(&configs, SubscriptionManager::new())
    }

    #[tokio::test]
    async fn forwarder_is_first_connected_in_insertion_order() {
        let balancer = balancer_with_two_sources();
        assert_none!(balancer.forwarder_index());

        balancer.sources[1].set_connected_for_test(true);
        assert_eq!(balancer.forwarder_index(), Some(1));

        balancer.sources[0].set_connected_for_test(true);
        assert_eq!(balancer.forwarder_index(), Some(0));
    }

    #[tokio::test]
    async fn proposed_traffic_is_relayed_exactly_once() {
        let balancer = balancer_with_two_sources();
        balancer.sources[0].set_connected_for_test(true);
        balancer.sources[1].set_connected_for_test(true);

        let (subscriber, mut receiver) = Subscriber::new();
        balancer.subscriptions.sub_proposed_transactions(&subscriber);

        let gate = ForwarderGate {
            balancer: Arc::downgrade(&balancer),
        };
        let payload = serde_json::json!({"type": "transaction", "id": 1});
        // the same proposed transaction arrives on both streams
        gate.relay(0, payload.clone());
        gate.relay(1, payload.clone());
        assert_some!(receiver.recv().await);
        assert_none!(receiver.try_recv().ok());

        // the forwarder fails over when the first source drops
        balancer.sources[0].set_connected_for_test(false);
        gate.relay(1, payload);
        assert_some!(receiver.recv().await);
    }

    #[tokio::test]
    async fn lap_order_skips_paused_sources() {
        let balancer = balancer_with_two_sources();
        balancer.sources[0].set_paused(true);
        let order = balancer.lap_order();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].ip(), "10.0.0.2");
    }

    #[tokio::test]
    async fn state_report_covers_every_source() {
        let balancer = balancer_with_two_sources();
        balancer.sources[1].set_connected_for_test(true);
        let report = balancer.state_report();
        assert_eq!(report.len(), 2);
        assert!(!report[0].connected);
        assert!(report[1].connected);
        assert!(report[1].forwarding);
        assert!(!report[0].forwarding);
    }
}
