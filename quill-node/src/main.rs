// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Composition root of the reporting node. Subsystems are built in
//! explicit dependency order — cache, backend facade, subscriptions,
//! validated-ledger queue, upstream sources, ETL — each receiving typed
//! handles to exactly the collaborators it needs.

mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use quill_backend::make_backend;
use quill_cache::LedgerCache;
use quill_config::QuillConfig;
use quill_etl::ReportingEtl;
use quill_subscriptions::SubscriptionManager;
use quill_upstream::{LoadBalancer, NetworkValidatedLedgers};
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing::{error, info, warn};

const BACKEND_OPEN_ATTEMPTS: u32 = 5;
const STATE_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "quill-node", about = "XRP-style ledger reporting node", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, short, default_value = "quill.yaml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match QuillConfig::load(&args.config) {
        Ok(config) => config,
        Err(config_error) => {
            eprintln!("invalid configuration: {}", config_error);
            return ExitCode::from(2);
        },
    };
    let _log_guard = match logging::init(&config.log) {
        Ok(guard) => guard,
        Err(log_error) => {
            eprintln!("failed to initialize logging: {}", log_error);
            return ExitCode::from(2);
        },
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("quill")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(runtime_error) => {
            error!(error = %runtime_error, "failed to build the runtime");
            return ExitCode::FAILURE;
        },
    };

    match runtime.block_on(run_node(config)) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        },
        Err(node_error) => {
            error!(error = %node_error, "fatal error");
            ExitCode::FAILURE
        },
    }
}

async fn run_node(config: QuillConfig) -> Result<()> {
    info!(
        read_only = config.read_only,
        sources = config.etl_sources.len(),
        "starting quill node"
    );
    if config.ssl_cert_file.is_some() {
        info!("TLS material configured for the server surface");
    }

    let cache = Arc::new(LedgerCache::new());
    let facade = make_backend(&config.database, cache);
    open_backend(&facade).await?;

    let subscriptions = SubscriptionManager::new();
    let validated = Arc::new(NetworkValidatedLedgers::new());
    let balancer = LoadBalancer::new(&config.etl_sources, subscriptions.clone());
    let source_tasks = balancer.spawn_subscriptions(validated.clone());

    let etl = ReportingEtl::new(
        &config,
        facade,
        balancer.clone(),
        validated,
        subscriptions,
    );

    let reporter = {
        let etl = etl.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(STATE_REPORT_INTERVAL).await;
                let report = etl.get_info();
                info!(
                    is_writer = report.is_writer,
                    read_only = report.read_only,
                    last_publish_age_seconds = report.last_publish_age_seconds,
                    connected_sources = report
                        .etl_sources
                        .iter()
                        .filter(|source| source.connected)
                        .count(),
                    "etl state"
                );
            }
        })
    };

    let etl_task = tokio::spawn(etl.run());
    let result = tokio::select! {
        outcome = etl_task => outcome
            .context("etl task panicked")?
            .context("etl stopped with an error"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            balancer.shut_down();
            Ok(())
        },
    };

    reporter.abort();
    for task in source_tasks {
        task.abort();
    }
    result
}

async fn open_backend(facade: &Arc<quill_backend::BackendInterface>) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match facade.open().await {
            Ok(()) => return Ok(()),
            Err(open_error) if open_error.is_retryable() && attempt < BACKEND_OPEN_ATTEMPTS => {
                warn!(
                    attempt = attempt,
                    error = %open_error,
                    "backend not reachable yet; retrying"
                );
                tokio::time::sleep(Duration::from_secs(2)).await;
            },
            Err(open_error) => {
                return Err(open_error).context("failed to open the backend");
            },
        }
    }
}
