// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{Blob, LedgerKey};
use serde::{Deserialize, Serialize};

/// A ledger state object materialized for a reader.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerObject {
    pub key: LedgerKey,
    pub blob: Blob,
}

/// One page of a key-ordered walk over the state at some sequence.
///
/// `cursor` is the key to resume from (exclusive); absent when the walk
/// reached the end of the chain. `warning` is set when the requested
/// sequence fell inside an un-indexed region and the page may be
/// incomplete; callers must surface it to end users.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerPage {
    pub objects: Vec<LedgerObject>,
    pub cursor: Option<LedgerKey>,
    pub warning: Option<&'static str>,
}

/// One page of offers gathered from a book directory walk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookOffersPage {
    pub offers: Vec<LedgerObject>,
    pub cursor: Option<LedgerKey>,
}
