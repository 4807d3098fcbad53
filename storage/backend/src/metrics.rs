// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::future::Future;

pub static API_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quill_backend_api_latency_seconds",
        "Latency of backend interface operations",
        &["api_name"]
    )
    .unwrap()
});

pub static API_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quill_backend_api_errors",
        "Backend interface operations that returned a non-sentinel error",
        &["api_name"]
    )
    .unwrap()
});

pub static LEDGER_SEQUENCE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "quill_backend_ledger_sequence",
        "Most recently committed ledger sequence"
    )
    .unwrap()
});

pub static COMMITTED_LEDGERS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quill_backend_committed_ledgers",
        "Ledger write transactions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Times a backend operation and counts hard failures, the way every public
/// read and write on the interface is instrumented.
pub(crate) async fn gauged<T, F>(api_name: &'static str, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timer = API_LATENCY_SECONDS
        .with_label_values(&[api_name])
        .start_timer();
    let result = operation.await;
    timer.observe_duration();
    if let Err(error) = &result {
        if !error.is_not_found() {
            API_ERRORS.with_label_values(&[api_name]).inc();
        }
    }
    result
}
