// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{key::Hash256, Blob, Sequence};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Hashing prefix for signed transactions, `"TXN\0"`.
const TXN_PREFIX: [u8; 4] = *b"TXN\0";

/// A transaction as stored: the opaque signed transaction blob, the opaque
/// metadata blob produced when it was applied, and where it landed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAndMetadata {
    pub transaction: Blob,
    pub metadata: Blob,
    pub ledger_sequence: Sequence,
    /// Close time of the containing ledger, stored alongside so account-tx
    /// scans can render dates without a header lookup.
    pub close_time: u64,
}

/// Identifying hash of a signed transaction blob: the truncated SHA-512 of
/// the prefixed blob, the same derivation the network uses.
pub fn transaction_hash(blob: &[u8]) -> Hash256 {
    let mut hasher = Sha512::new();
    hasher.update(TXN_PREFIX);
    hasher.update(blob);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_content_sensitive() {
        let first = transaction_hash(b"payment");
        assert_eq!(first, transaction_hash(b"payment"));
        assert_ne!(first, transaction_hash(b"payment!"));
        assert_ne!(first, Hash256::default());
    }
}
