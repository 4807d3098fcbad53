// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Sequence;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// The persisted contiguous interval of ledgers, `[min, max]`. Extended only
/// at `max + 1` by the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRange {
    pub min_sequence: Sequence,
    pub max_sequence: Sequence,
}

impl LedgerRange {
    pub fn new(min_sequence: Sequence, max_sequence: Sequence) -> Self {
        Self {
            min_sequence,
            max_sequence,
        }
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.min_sequence <= sequence && sequence <= self.max_sequence
    }
}

impl Display for LedgerRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.min_sequence == self.max_sequence {
            write!(f, "{}", self.min_sequence)
        } else {
            write!(f, "{}-{}", self.min_sequence, self.max_sequence)
        }
    }
}

/// Cursor for paging through the account-transaction index. Scans run
/// newest-first by default, so the cursor marks the next (seq, index) pair
/// to resume from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransactionsCursor {
    pub ledger_sequence: Sequence,
    pub transaction_index: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed ledger range string: {0:?}")]
pub struct RangeParseError(pub String);

/// A set of disjoint validated-ledger ranges as advertised by an upstream
/// peer: `"a-b,c-d,e"`. Kept sorted by start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceRangeSet {
    ranges: Vec<(Sequence, Sequence)>,
}

impl SequenceRangeSet {
    /// Parse the advertised form. Singleton entries (`"e"`) are ranges of
    /// one. Entries may arrive unsorted; the result is sorted by start.
    pub fn parse(raw: &str) -> Result<Self, RangeParseError> {
        let mut ranges = Vec::new();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self { ranges });
        }
        for piece in trimmed.split(',') {
            let piece = piece.trim();
            let (lo, hi) = match piece.split_once('-') {
                Some((lo, hi)) => (lo, hi),
                None => (piece, piece),
            };
            let lo: Sequence = lo
                .trim()
                .parse()
                .map_err(|_| RangeParseError(raw.to_string()))?;
            let hi: Sequence = hi
                .trim()
                .parse()
                .map_err(|_| RangeParseError(raw.to_string()))?;
            if lo > hi {
                return Err(RangeParseError(raw.to_string()));
            }
            ranges.push((lo, hi));
        }
        ranges.sort_unstable();
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.ranges
            .iter()
            .any(|(lo, hi)| *lo <= sequence && sequence <= *hi)
    }

    pub fn max(&self) -> Option<Sequence> {
        self.ranges.iter().map(|(_, hi)| *hi).max()
    }
}

impl Display for SequenceRangeSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (lo, hi) in &self.ranges {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "{}-{}", lo, hi)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[test]
    fn parses_sorted_disjoint_ranges() {
        let set = assert_ok!(SequenceRangeSet::parse("32570-32580,32582,32590-32600"));
        assert!(set.contains(32570));
        assert!(set.contains(32582));
        assert!(!set.contains(32581));
        assert_eq!(set.max(), Some(32600));
    }

    #[test]
    fn parses_unsorted_input() {
        let set = assert_ok!(SequenceRangeSet::parse("50-60, 10-20"));
        assert!(set.contains(15));
        assert!(set.contains(55));
        assert_eq!(set.max(), Some(60));
        assert_eq!(set.to_string(), "10-20,50-60");
    }

    #[test]
    fn empty_and_malformed() {
        assert_ok!(SequenceRangeSet::parse(""));
        assert_err!(SequenceRangeSet::parse("abc"));
        assert_err!(SequenceRangeSet::parse("30-20"));
        assert_err!(SequenceRangeSet::parse("5-"));
    }
}
