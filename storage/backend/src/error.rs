// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Error taxonomy of the storage layer. `Timeout` and `Unavailable` are
/// retryable; `NotFound` is an expected sentinel (a sequence out of the
/// persisted range, a pruned ledger) and is not logged as an error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database operation timed out")]
    Timeout,
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("not found")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("fatal storage inconsistency: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Timeout | BackendError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound)
    }
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;
