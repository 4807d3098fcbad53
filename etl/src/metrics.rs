// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

pub static STAGE_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quill_etl_stage_latency_seconds",
        "Latency of one ledger through each pipeline stage",
        &["stage"]
    )
    .unwrap()
});

pub static LEDGERS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quill_etl_ledgers_processed",
        "Ledgers handled by the pipeline, by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static PUBLISHED_SEQUENCE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "quill_etl_published_sequence",
        "Most recently published ledger sequence"
    )
    .unwrap()
});
