// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use quill_config::{LogConfig, LogFormat};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber per config. The returned guard must live
/// for the process lifetime so buffered file output is flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_new(format!("quill={}", config.level)))
        .context("invalid log_level")?;

    match &config.directory {
        Some(directory) => {
            let rotation = if config.rotation_hour_interval >= 24 {
                Rotation::DAILY
            } else {
                Rotation::HOURLY
            };
            // Bound the directory by file count; each rotation is capped
            // by time, the count by total size over rotation size.
            let max_files = (config.directory_max_size_mb / config.rotation_size_mb.max(1))
                .clamp(2, 1024) as usize;
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix("quill")
                .filename_suffix("log")
                .max_log_files(max_files)
                .build(directory)
                .context("failed to open the log directory")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false);
            match config.format {
                LogFormat::Json => builder.json().init(),
                LogFormat::Text => builder.init(),
            }
            Ok(Some(guard))
        },
        None => {
            let builder = tracing_subscriber::fmt().with_env_filter(filter);
            match config.format {
                LogFormat::Json => builder.json().init(),
                LogFormat::Text => builder.init(),
            }
            Ok(None)
        },
    }
}
