// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// Smallest possible key. Never denotes a real object; it is the left
/// endpoint of the successor chain.
pub const FIRST_KEY: LedgerKey = LedgerKey([0u8; 32]);

/// Largest possible key. Never denotes a real object; it terminates the
/// successor chain.
pub const LAST_KEY: LedgerKey = LedgerKey([0xffu8; 32]);

#[derive(Debug, Error, PartialEq)]
pub enum KeyParseError {
    #[error("expected {expected} hex characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// 256 bit identifier of a ledger state object. Ordering is the ordering of
/// the successor chain: lexicographic over the big-endian bytes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LedgerKey(pub [u8; 32]);

impl LedgerKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// The next key in lexicographic order, or `None` if this is `LAST_KEY`'s
    /// numeric maximum. Used to seed successor lookups ("first key strictly
    /// greater than").
    pub fn next(&self) -> Option<Self> {
        let mut bytes = self.0;
        for byte in bytes.iter_mut().rev() {
            let (incremented, overflow) = byte.overflowing_add(1);
            *byte = incremented;
            if !overflow {
                return Some(Self(bytes));
            }
        }
        None
    }
}

impl Display for LedgerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl Debug for LedgerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerKey({})", self)
    }
}

impl FromStr for LedgerKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(KeyParseError::WrongLength {
                expected: 64,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s)?;
        Ok(Self(bytes.try_into().unwrap()))
    }
}

impl From<[u8; 32]> for LedgerKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<u64> for LedgerKey {
    /// Low-order construction, handy in tests: `LedgerKey::from(42u64)`.
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

/// 256 bit transaction or ledger hash. Same layout as [`LedgerKey`] but a
/// distinct type: hashes are never walked in key order.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl Debug for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(KeyParseError::WrongLength {
                expected: 64,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s)?;
        Ok(Self(bytes.try_into().unwrap()))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<u64> for Hash256 {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_some_eq};

    #[test]
    fn sentinels_bracket_every_key() {
        let key = LedgerKey::from(0xdead_beefu64);
        assert!(FIRST_KEY < key);
        assert!(key < LAST_KEY);
    }

    #[test]
    fn next_increments_lexicographically() {
        assert_some_eq!(LedgerKey::from(41u64).next(), LedgerKey::from(42u64));

        let mut carry = [0u8; 32];
        carry[24..].copy_from_slice(&u64::MAX.to_be_bytes());
        let mut expected = [0u8; 32];
        expected[23] = 1;
        assert_some_eq!(LedgerKey(carry).next(), LedgerKey(expected));

        assert_none!(LedgerKey([0xff; 32]).next());
    }

    #[test]
    fn hex_round_trip() {
        let key = LedgerKey::from(7u64);
        let parsed: LedgerKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);

        let err = "abc".parse::<LedgerKey>().unwrap_err();
        assert_eq!(
            err,
            KeyParseError::WrongLength {
                expected: 64,
                actual: 3
            }
        );
    }
}
