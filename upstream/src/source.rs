// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! One upstream peer: a long-lived WebSocket subscription for validated
//! ledger announcements, a gRPC channel for extraction, and short-lived
//! sockets for forwarded requests.
//!
//! The subscription is a single linear async loop: resolve, connect,
//! subscribe, then read until the stream breaks, with a 30 second cap on
//! every pre-reading state and capped exponential backoff between
//! attempts.

use crate::{
    message::{subscribe_command, StreamMessage},
    validated::NetworkValidatedLedgers,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use quill_config::EtlSourceConfig;
use quill_protos::ledger::v1::{
    ledger_service_client::LedgerServiceClient, GetLedgerDataRequest, GetLedgerRequest,
    GetLedgerResponse, RawLedgerObject,
};
use quill_types::{LedgerKey, Sequence, SequenceRangeSet};
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const GRPC_TIMEOUT: Duration = Duration::from_secs(10);
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("websocket failure: {0}")]
    WebSocket(String),
    #[error("grpc transport failure: {0}")]
    Transport(String),
    #[error("grpc call failed: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("upstream operation timed out")]
    Timeout,
    #[error("ledger {0} not validated on this source")]
    NotValidated(Sequence),
    #[error("source is shutting down")]
    Shutdown,
}

/// Sink for proposed-transaction payloads observed on a source's stream.
/// The balancer implements this and enforces the designated-forwarder
/// rule, so a source never needs a handle back to its pool.
pub trait ProposedRelay: Send + Sync + 'static {
    fn relay(&self, source_index: usize, payload: Value);
}

pub struct UpstreamSource {
    index: usize,
    ip: String,
    ws_port: u16,
    grpc_port: u16,
    connected: AtomicBool,
    paused: AtomicBool,
    validated: RwLock<SequenceRangeSet>,
    last_message: RwLock<Option<Instant>>,
    grpc: Mutex<Option<LedgerServiceClient<Channel>>>,
}

impl UpstreamSource {
    pub fn new(index: usize, config: &EtlSourceConfig) -> Self {
        Self {
            index,
            ip: config.ip.to_string(),
            ws_port: config.ws_port,
            grpc_port: config.grpc_port,
            connected: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            validated: RwLock::new(SequenceRangeSet::default()),
            last_message: RwLock::new(None),
            grpc: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Whether this source advertises `sequence` as validated.
    pub fn has_ledger(&self, sequence: Sequence) -> bool {
        self.validated.read().contains(sequence)
    }

    pub fn validated_range(&self) -> SequenceRangeSet {
        self.validated.read().clone()
    }

    pub fn last_message_age(&self) -> Option<Duration> {
        self.last_message.read().map(|at| at.elapsed())
    }

    #[cfg(test)]
    pub(crate) fn set_connected_for_test(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ip, self.ws_port)
    }

    fn grpc_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.grpc_port)
    }

    // ------------------------------------------------------- subscription

    /// Run the subscription until aborted. Validated announcements land in
    /// `validated_ledgers`; proposed payloads go to `relay`.
    pub async fn run_subscription(
        self: Arc<Self>,
        validated_ledgers: Arc<NetworkValidatedLedgers>,
        relay: Arc<dyn ProposedRelay>,
    ) {
        let mut failures: u32 = 0;
        loop {
            match self.connect_and_read(&validated_ledgers, &relay).await {
                Ok(()) => {
                    // clean close; reconnect immediately
                    failures = 0;
                },
                Err(error) => {
                    failures = failures.saturating_add(1);
                    let backoff = Duration::from_secs(1 << failures.min(5))
                        .min(BACKOFF_CAP);
                    warn!(
                        source = %self.ip,
                        error = %error,
                        backoff_secs = backoff.as_secs(),
                        "subscription dropped"
                    );
                    tokio::time::sleep(backoff).await;
                },
            }
            self.connected.store(false, Ordering::Release);
        }
    }

    async fn connect_and_read(
        &self,
        validated_ledgers: &NetworkValidatedLedgers,
        relay: &Arc<dyn ProposedRelay>,
    ) -> Result<(), SourceError> {
        let url = self.ws_url();
        let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(|error| SourceError::WebSocket(error.to_string()))?;
        let (mut sink, mut reader) = stream.split();

        tokio::time::timeout(
            CONNECT_TIMEOUT,
            sink.send(Message::Text(subscribe_command())),
        )
        .await
        .map_err(|_| SourceError::Timeout)?
        .map_err(|error| SourceError::WebSocket(error.to_string()))?;

        self.connected.store(true, Ordering::Release);
        info!(source = %self.ip, "subscribed to upstream stream");

        while let Some(frame) = reader.next().await {
            let frame = frame.map_err(|error| SourceError::WebSocket(error.to_string()))?;
            *self.last_message.write() = Some(Instant::now());
            match frame {
                Message::Text(text) => {
                    let Some(message) = StreamMessage::parse(&text) else {
                        debug!(source = %self.ip, "skipping unparseable frame");
                        continue;
                    };
                    if let Some(range) = message.validated_range {
                        *self.validated.write() = range;
                    }
                    if let Some(sequence) = message.validated_sequence {
                        validated_ledgers.push(sequence);
                    }
                    if let Some(payload) = message.proposed {
                        relay.relay(self.index, payload);
                    }
                },
                Message::Ping(payload) => {
                    sink.send(Message::Pong(payload))
                        .await
                        .map_err(|error| SourceError::WebSocket(error.to_string()))?;
                },
                Message::Close(_) => break,
                _ => {},
            }
        }
        Ok(())
    }

    // --------------------------------------------------------- extraction

    async fn grpc_client(&self) -> Result<LedgerServiceClient<Channel>, SourceError> {
        let mut cached = self.grpc.lock().await;
        if let Some(client) = cached.as_ref() {
            return Ok(client.clone());
        }
        let endpoint = Endpoint::from_shared(self.grpc_url())
            .map_err(|error| SourceError::Transport(error.to_string()))?
            .timeout(GRPC_TIMEOUT)
            .connect_timeout(GRPC_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|error| SourceError::Transport(error.to_string()))?;
        let client = LedgerServiceClient::new(channel)
            .max_decoding_message_size(usize::MAX);
        *cached = Some(client.clone());
        Ok(client)
    }

    async fn reset_grpc(&self) {
        *self.grpc.lock().await = None;
    }

    /// Fetch one ledger: header, expanded transactions, and (when
    /// `get_objects`) the state diff against its parent.
    pub async fn fetch_ledger(
        &self,
        sequence: Sequence,
        get_objects: bool,
    ) -> Result<GetLedgerResponse, SourceError> {
        let mut client = self.grpc_client().await?;
        let request = GetLedgerRequest {
            sequence,
            transactions: true,
            expand: true,
            get_objects,
        };
        let response = match client.get_ledger(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                self.reset_grpc().await;
                return Err(SourceError::Grpc(status));
            },
        };
        if !response.validated {
            return Err(SourceError::NotValidated(sequence));
        }
        Ok(response)
    }

    /// Stream the complete state of ledger `sequence`, `num_markers` key
    /// ranges in parallel. Batches (or a first error) arrive on the
    /// returned channel; the transfer stops early if the receiver drops.
    pub async fn load_initial_ledger(
        self: &Arc<Self>,
        sequence: Sequence,
        num_markers: u32,
    ) -> Result<mpsc::Receiver<Result<Vec<RawLedgerObject>, SourceError>>, SourceError> {
        let client = self.grpc_client().await?;
        let num_markers = num_markers.clamp(1, 256);
        let (batches, receiver) = mpsc::channel(num_markers as usize * 2);
        for marker_index in 0..num_markers {
            let mut client = client.clone();
            let batches = batches.clone();
            let first_byte = (marker_index * 256 / num_markers) as u8;
            let end_byte = ((marker_index + 1) * 256 / num_markers) as u8;
            let start = if marker_index == 0 {
                Vec::new()
            } else {
                marker_key(first_byte)
            };
            let end_marker = if marker_index + 1 == num_markers {
                Vec::new()
            } else {
                marker_key(end_byte)
            };
            tokio::spawn(async move {
                let mut marker = start;
                loop {
                    let request = GetLedgerDataRequest {
                        sequence,
                        marker: marker.clone(),
                        end_marker: end_marker.clone(),
                    };
                    match client.get_ledger_data(request).await {
                        Ok(response) => {
                            let response = response.into_inner();
                            let objects = response
                                .ledger_objects
                                .map(|wrapper| wrapper.objects)
                                .unwrap_or_default();
                            if !objects.is_empty()
                                && batches.send(Ok(objects)).await.is_err()
                            {
                                return;
                            }
                            if response.marker.is_empty() {
                                return;
                            }
                            marker = response.marker;
                        },
                        Err(status) => {
                            let _ = batches.send(Err(SourceError::Grpc(status))).await;
                            return;
                        },
                    }
                }
            });
        }
        Ok(receiver)
    }

    // --------------------------------------------------------- forwarding

    /// Proxy an opaque client request over a short-lived socket and return
    /// the peer's single response.
    pub async fn forward_request(&self, request: &Value) -> Result<Value, SourceError> {
        let exchange = async {
            let (stream, _) = connect_async(self.ws_url())
                .await
                .map_err(|error| SourceError::WebSocket(error.to_string()))?;
            let (mut sink, mut reader) = stream.split();
            sink.send(Message::Text(request.to_string()))
                .await
                .map_err(|error| SourceError::WebSocket(error.to_string()))?;
            while let Some(frame) = reader.next().await {
                let frame =
                    frame.map_err(|error| SourceError::WebSocket(error.to_string()))?;
                if let Message::Text(text) = frame {
                    return serde_json::from_str(&text).map_err(|error| {
                        SourceError::WebSocket(format!("bad forward response: {}", error))
                    });
                }
            }
            Err(SourceError::WebSocket(
                "connection closed before a response".to_string(),
            ))
        };
        tokio::time::timeout(FORWARD_TIMEOUT, exchange)
            .await
            .map_err(|_| SourceError::Timeout)?
    }
}

/// A key-space marker starting at `first_byte`.
fn marker_key(first_byte: u8) -> Vec<u8> {
    let mut bytes = [0u8; 32];
    bytes[0] = first_byte;
    LedgerKey::new(bytes).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_config::EtlSourceConfig;

    fn source() -> UpstreamSource {
        UpstreamSource::new(
            0,
            &EtlSourceConfig {
                ip: "127.0.0.1".parse().unwrap(),
                ws_port: 6006,
                grpc_port: 50051,
                cache: Vec::new(),
            },
        )
    }

    #[test]
    fn validated_range_gates_has_ledger() {
        let source = source();
        assert!(!source.has_ledger(10));
        *source.validated.write() = SequenceRangeSet::parse("5-10,20").unwrap();
        assert!(source.has_ledger(10));
        assert!(source.has_ledger(20));
        assert!(!source.has_ledger(15));
    }

    #[test]
    fn marker_partitions_cover_the_key_space() {
        // 4 markers: 0x00, 0x40, 0x80, 0xc0
        assert_eq!(marker_key(0x40)[0], 0x40);
        assert_eq!(marker_key(0x40).len(), 32);
        assert_eq!((1 * 256 / 4) as u8, 0x40);
        assert_eq!((3 * 256 / 4) as u8, 0xc0);
    }
}
