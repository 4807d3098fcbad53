// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{key::Hash256, Sequence};
use serde::{Deserialize, Serialize};

/// Header of a single validated ledger. Created exactly once, by the ETL
/// writer, as the final step of the ledger's write transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub sequence: Sequence,
    pub hash: Hash256,
    pub parent_hash: Hash256,
    pub tx_hash: Hash256,
    pub state_hash: Hash256,
    /// Seconds since the network epoch at which this ledger closed.
    pub close_time: u64,
    pub parent_close_time: u64,
    pub close_time_resolution: u32,
    pub close_flags: u32,
    /// Total supply, in drops, as of this ledger.
    pub total_drops: u64,
}

impl LedgerHeader {
    /// Serialized form stored in the headers table and handed to
    /// subscribers. Fixed-width big-endian fields, hashes in key order.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 32 * 4 + 8 * 3 + 4 * 2);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(self.hash.as_bytes());
        out.extend_from_slice(self.parent_hash.as_bytes());
        out.extend_from_slice(self.tx_hash.as_bytes());
        out.extend_from_slice(self.state_hash.as_bytes());
        out.extend_from_slice(&self.close_time.to_be_bytes());
        out.extend_from_slice(&self.parent_close_time.to_be_bytes());
        out.extend_from_slice(&self.total_drops.to_be_bytes());
        out.extend_from_slice(&self.close_time_resolution.to_be_bytes());
        out.extend_from_slice(&self.close_flags.to_be_bytes());
        out
    }

    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        const LEN: usize = 4 + 32 * 4 + 8 * 3 + 4 * 2;
        if blob.len() != LEN {
            return None;
        }
        Some(Self {
            sequence: Sequence::from_be_bytes(blob[0..4].try_into().ok()?),
            hash: Hash256::from_slice(&blob[4..36])?,
            parent_hash: Hash256::from_slice(&blob[36..68])?,
            tx_hash: Hash256::from_slice(&blob[68..100])?,
            state_hash: Hash256::from_slice(&blob[100..132])?,
            close_time: u64::from_be_bytes(blob[132..140].try_into().ok()?),
            parent_close_time: u64::from_be_bytes(blob[140..148].try_into().ok()?),
            total_drops: u64::from_be_bytes(blob[148..156].try_into().ok()?),
            close_time_resolution: u32::from_be_bytes(blob[156..160].try_into().ok()?),
            close_flags: u32::from_be_bytes(blob[160..164].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let header = LedgerHeader {
            sequence: 100,
            hash: Hash256::from(1u64),
            parent_hash: Hash256::from(2u64),
            tx_hash: Hash256::from(3u64),
            state_hash: Hash256::from(4u64),
            close_time: 700_000_000,
            parent_close_time: 699_999_990,
            close_time_resolution: 10,
            close_flags: 0,
            total_drops: 99_999_999_999_999_999,
        };
        assert_eq!(LedgerHeader::from_blob(&header.to_blob()), Some(header));
        assert_eq!(LedgerHeader::from_blob(b"short"), None);
    }
}
