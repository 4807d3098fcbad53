// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connectivity to upstream consensus peers: one [`UpstreamSource`] per
//! configured peer (WebSocket subscription plus gRPC extraction), a
//! [`LoadBalancer`] fanning requests across them, and the shared
//! validated-ledger queue the sources feed.

mod balancer;
mod message;
mod source;
mod validated;

pub use balancer::{LoadBalancer, SourceStateReport};
pub use message::StreamMessage;
pub use source::{ProposedRelay, SourceError, UpstreamSource};
pub use validated::NetworkValidatedLedgers;
