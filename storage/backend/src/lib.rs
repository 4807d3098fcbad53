// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Storage layer of the reporting node: the capability trait over the
//! KV/columnar engine, its three implementations, and the read/write
//! facade ([`BackendInterface`]) everything else talks to.

mod cassandra;
mod error;
mod interface;
mod metrics;
mod mock;
mod postgres;
mod store;

pub use cassandra::CassandraBackend;
pub use error::{BackendError, Result};
pub use interface::{BackendInterface, MAX_REQUEST_LIMIT, PAGE_WARNING};
pub use mock::MockBackend;
pub use postgres::PostgresBackend;
pub use store::{
    Backend, NftTransactionsCursor, ObjectWrite, SuccessorWrite, TransactionWrite,
};

use quill_cache::LedgerCache;
use quill_config::DatabaseConfig;
use std::sync::Arc;

/// Build the store selected by `database.type` and wrap it in the facade.
pub fn make_backend(
    database: &DatabaseConfig,
    cache: Arc<LedgerCache>,
) -> Arc<BackendInterface> {
    let store: Arc<dyn Backend> = match database {
        DatabaseConfig::Cassandra(config) => Arc::new(CassandraBackend::new(config.clone())),
        DatabaseConfig::Postgres(config) => Arc::new(PostgresBackend::new(config.clone())),
        DatabaseConfig::Mock => Arc::new(MockBackend::new()),
    };
    Arc::new(BackendInterface::new(store, cache))
}
