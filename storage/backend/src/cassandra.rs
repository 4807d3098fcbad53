// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cassandra/ScyllaDB backend. One table per entity; versioned tables
//! cluster on sequence descending so "latest version <= seq" is a single
//! partition read. The range tip lives in a two-row table and advances via
//! a lightweight transaction, which is the whole write-conflict mechanism.

use crate::{
    error::{BackendError, Result},
    store::{
        Backend, NftTransactionsCursor, ObjectWrite, SuccessorWrite, TransactionWrite,
    },
};
use async_trait::async_trait;
use futures::future::try_join_all;
use quill_config::CassandraConfig;
use quill_types::{
    AccountId, AccountTransactionData, AccountTransactionsCursor, Blob, Hash256, LedgerHeader,
    LedgerKey, LedgerObject, LedgerRange, NftData, NftTransactionData, Sequence,
    TransactionAndMetadata,
};
use scylla::{
    prepared_statement::PreparedStatement, serialize::row::SerializeRow,
    transport::errors::QueryError, QueryResult, Session, SessionBuilder,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{info, warn};

const STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

struct Statements {
    insert_object: PreparedStatement,
    insert_diff: PreparedStatement,
    insert_successor: PreparedStatement,
    insert_transaction: PreparedStatement,
    insert_ledger_transaction: PreparedStatement,
    insert_ledger: PreparedStatement,
    insert_ledger_hash: PreparedStatement,
    insert_account_tx: PreparedStatement,
    insert_nft: PreparedStatement,
    insert_nft_tx: PreparedStatement,
    select_object: PreparedStatement,
    select_diff: PreparedStatement,
    select_successor: PreparedStatement,
    select_transaction: PreparedStatement,
    select_ledger_transactions: PreparedStatement,
    select_ledger: PreparedStatement,
    select_ledger_hash: PreparedStatement,
    select_range: PreparedStatement,
    select_account_tx_backward: PreparedStatement,
    select_account_tx_forward: PreparedStatement,
    select_nft: PreparedStatement,
    select_nft_tx_backward: PreparedStatement,
    select_nft_tx_forward: PreparedStatement,
    update_range_conditional: PreparedStatement,
    insert_range_if_absent: PreparedStatement,
    insert_range_min: PreparedStatement,
}

pub struct CassandraBackend {
    config: CassandraConfig,
    session: OnceCell<Session>,
    statements: OnceCell<Statements>,
    /// Caps in-flight statements, the `max_requests_outstanding` knob.
    permits: Arc<Semaphore>,
}

impl CassandraBackend {
    pub fn new(config: CassandraConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_requests_outstanding));
        Self {
            config,
            session: OnceCell::new(),
            statements: OnceCell::new(),
            permits,
        }
    }

    fn table(&self, name: &str) -> String {
        format!(
            "{}.{}{}",
            self.config.keyspace, self.config.table_prefix, name
        )
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .get()
            .ok_or_else(|| BackendError::Unavailable("cassandra session not open".to_string()))
    }

    fn statements(&self) -> Result<&Statements> {
        self.statements
            .get()
            .ok_or_else(|| BackendError::Unavailable("cassandra session not open".to_string()))
    }

    async fn execute(
        &self,
        statement: &PreparedStatement,
        values: impl SerializeRow,
    ) -> Result<QueryResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BackendError::Unavailable("request semaphore closed".to_string()))?;
        let session = self.session()?;
        match tokio::time::timeout(STATEMENT_TIMEOUT, session.execute(statement, values)).await
        {
            Ok(result) => result.map_err(map_query_error),
            Err(_) => Err(BackendError::Timeout),
        }
    }

    async fn create_schema(&self, session: &Session) -> Result<()> {
        let replication = format!(
            "{{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            self.config.replication_factor
        );
        let ttl = format!(" AND default_time_to_live = {}", self.config.ttl);
        let table_options = if self.config.ttl > 0 { ttl.as_str() } else { "" };
        let ddl = [
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {}",
                self.config.keyspace, replication
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (key blob, sequence bigint, object blob, \
                 PRIMARY KEY (key, sequence)) \
                 WITH CLUSTERING ORDER BY (sequence DESC){}",
                self.table("objects"),
                table_options
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (key blob, sequence bigint, next blob, \
                 PRIMARY KEY (key, sequence)) \
                 WITH CLUSTERING ORDER BY (sequence DESC){}",
                self.table("successor"),
                table_options
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (sequence bigint, key blob, object blob, \
                 PRIMARY KEY (sequence, key)){}",
                self.table("diff"),
                table_options
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (hash blob PRIMARY KEY, \
                 ledger_sequence bigint, date bigint, transaction blob, metadata blob){}",
                self.table("transactions"),
                if self.config.ttl > 0 {
                    " WITH default_time_to_live = 0"
                } else {
                    ""
                }
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (ledger_sequence bigint, hash blob, \
                 PRIMARY KEY (ledger_sequence, hash))",
                self.table("ledger_transactions")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (sequence bigint PRIMARY KEY, header blob)",
                self.table("ledgers")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (hash blob PRIMARY KEY, sequence bigint)",
                self.table("ledger_hashes")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (is_latest boolean PRIMARY KEY, sequence bigint)",
                self.table("ledger_range")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (account blob, ledger_sequence bigint, \
                 transaction_index bigint, hash blob, \
                 PRIMARY KEY (account, ledger_sequence, transaction_index)) \
                 WITH CLUSTERING ORDER BY (ledger_sequence DESC, transaction_index DESC)",
                self.table("account_tx")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (token_id blob, sequence bigint, \
                 owner blob, is_burned boolean, uri blob, \
                 PRIMARY KEY (token_id, sequence)) \
                 WITH CLUSTERING ORDER BY (sequence DESC)",
                self.table("nf_tokens")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (token_id blob, ledger_sequence bigint, \
                 transaction_index bigint, hash blob, \
                 PRIMARY KEY (token_id, ledger_sequence, transaction_index)) \
                 WITH CLUSTERING ORDER BY (ledger_sequence DESC, transaction_index DESC)",
                self.table("nf_token_transactions")
            ),
        ];
        for statement in &ddl {
            session
                .query(statement.as_str(), ())
                .await
                .map_err(map_query_error)?;
        }
        Ok(())
    }

    async fn prepare_statements(&self, session: &Session) -> Result<Statements> {
        let prepare = |cql: String| async move {
            session
                .prepare(cql)
                .await
                .map_err(|error| BackendError::Unavailable(error.to_string()))
        };
        Ok(Statements {
            insert_object: prepare(format!(
                "INSERT INTO {} (key, sequence, object) VALUES (?, ?, ?)",
                self.table("objects")
            ))
            .await?,
            insert_diff: prepare(format!(
                "INSERT INTO {} (sequence, key, object) VALUES (?, ?, ?)",
                self.table("diff")
            ))
            .await?,
            insert_successor: prepare(format!(
                "INSERT INTO {} (key, sequence, next) VALUES (?, ?, ?)",
                self.table("successor")
            ))
            .await?,
            insert_transaction: prepare(format!(
                "INSERT INTO {} (hash, ledger_sequence, date, transaction, metadata) \
                 VALUES (?, ?, ?, ?, ?)",
                self.table("transactions")
            ))
            .await?,
            insert_ledger_transaction: prepare(format!(
                "INSERT INTO {} (ledger_sequence, hash) VALUES (?, ?)",
                self.table("ledger_transactions")
            ))
            .await?,
            insert_ledger: prepare(format!(
                "INSERT INTO {} (sequence, header) VALUES (?, ?)",
                self.table("ledgers")
            ))
            .await?,
            insert_ledger_hash: prepare(format!(
                "INSERT INTO {} (hash, sequence) VALUES (?, ?)",
                self.table("ledger_hashes")
            ))
            .await?,
            insert_account_tx: prepare(format!(
                "INSERT INTO {} (account, ledger_sequence, transaction_index, hash) \
                 VALUES (?, ?, ?, ?)",
                self.table("account_tx")
            ))
            .await?,
            insert_nft: prepare(format!(
                "INSERT INTO {} (token_id, sequence, owner, is_burned, uri) \
                 VALUES (?, ?, ?, ?, ?)",
                self.table("nf_tokens")
            ))
            .await?,
            insert_nft_tx: prepare(format!(
                "INSERT INTO {} (token_id, ledger_sequence, transaction_index, hash) \
                 VALUES (?, ?, ?, ?)",
                self.table("nf_token_transactions")
            ))
            .await?,
            select_object: prepare(format!(
                "SELECT object FROM {} WHERE key = ? AND sequence <= ? LIMIT 1",
                self.table("objects")
            ))
            .await?,
            select_diff: prepare(format!(
                "SELECT key, object FROM {} WHERE sequence = ?",
                self.table("diff")
            ))
            .await?,
            select_successor: prepare(format!(
                "SELECT next FROM {} WHERE key = ? AND sequence <= ? LIMIT 1",
                self.table("successor")
            ))
            .await?,
            select_transaction: prepare(format!(
                "SELECT transaction, metadata, ledger_sequence, date FROM {} WHERE hash = ?",
                self.table("transactions")
            ))
            .await?,
            select_ledger_transactions: prepare(format!(
                "SELECT hash FROM {} WHERE ledger_sequence = ?",
                self.table("ledger_transactions")
            ))
            .await?,
            select_ledger: prepare(format!(
                "SELECT header FROM {} WHERE sequence = ?",
                self.table("ledgers")
            ))
            .await?,
            select_ledger_hash: prepare(format!(
                "SELECT sequence FROM {} WHERE hash = ?",
                self.table("ledger_hashes")
            ))
            .await?,
            select_range: prepare(format!(
                "SELECT is_latest, sequence FROM {}",
                self.table("ledger_range")
            ))
            .await?,
            select_account_tx_backward: prepare(format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE account = ? AND (ledger_sequence, transaction_index) <= (?, ?) \
                 LIMIT ?",
                self.table("account_tx")
            ))
            .await?,
            select_account_tx_forward: prepare(format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE account = ? AND (ledger_sequence, transaction_index) >= (?, ?) \
                 ORDER BY ledger_sequence ASC, transaction_index ASC LIMIT ?",
                self.table("account_tx")
            ))
            .await?,
            select_nft: prepare(format!(
                "SELECT sequence, owner, is_burned, uri FROM {} \
                 WHERE token_id = ? AND sequence <= ? LIMIT 1",
                self.table("nf_tokens")
            ))
            .await?,
            select_nft_tx_backward: prepare(format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE token_id = ? AND (ledger_sequence, transaction_index) <= (?, ?) \
                 LIMIT ?",
                self.table("nf_token_transactions")
            ))
            .await?,
            select_nft_tx_forward: prepare(format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE token_id = ? AND (ledger_sequence, transaction_index) >= (?, ?) \
                 ORDER BY ledger_sequence ASC, transaction_index ASC LIMIT ?",
                self.table("nf_token_transactions")
            ))
            .await?,
            update_range_conditional: prepare(format!(
                "UPDATE {} SET sequence = ? WHERE is_latest = true IF sequence = ?",
                self.table("ledger_range")
            ))
            .await?,
            insert_range_if_absent: prepare(format!(
                "INSERT INTO {} (is_latest, sequence) VALUES (?, ?) IF NOT EXISTS",
                self.table("ledger_range")
            ))
            .await?,
            insert_range_min: prepare(format!(
                "INSERT INTO {} (is_latest, sequence) VALUES (false, ?)",
                self.table("ledger_range")
            ))
            .await?,
        })
    }
}

fn map_query_error(error: QueryError) -> BackendError {
    match error {
        QueryError::TimeoutError | QueryError::RequestTimeout(_) => BackendError::Timeout,
        other => BackendError::Unavailable(other.to_string()),
    }
}

fn sequence_to_db(sequence: Sequence) -> i64 {
    sequence as i64
}

fn applied(result: &QueryResult) -> bool {
    // LWT results carry an `[applied]` boolean in the first column.
    result
        .rows
        .as_ref()
        .and_then(|rows| rows.first())
        .and_then(|row| row.columns.first())
        .and_then(|column| column.as_ref())
        .and_then(|value| value.as_boolean())
        .unwrap_or(false)
}

#[async_trait]
impl Backend for CassandraBackend {
    async fn open(&self) -> Result<()> {
        let nodes: Vec<String> = self
            .config
            .contact_points
            .iter()
            .map(|host| format!("{}:{}", host, self.config.port))
            .collect();
        let session = SessionBuilder::new()
            .known_nodes(&nodes)
            .build()
            .await
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        self.create_schema(&session).await?;
        let statements = self.prepare_statements(&session).await?;
        self.session
            .set(session)
            .map_err(|_| BackendError::Unavailable("backend opened twice".to_string()))?;
        self.statements
            .set(statements)
            .map_err(|_| BackendError::Unavailable("backend opened twice".to_string()))?;
        info!(keyspace = %self.config.keyspace, "cassandra backend ready");
        Ok(())
    }

    async fn fetch_ledger_by_sequence(
        &self,
        sequence: Sequence,
    ) -> Result<Option<LedgerHeader>> {
        let statements = self.statements()?;
        let result = self
            .execute(&statements.select_ledger, (sequence_to_db(sequence),))
            .await?;
        let row = result
            .maybe_first_row_typed::<(Vec<u8>,)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(row.and_then(|(header,)| LedgerHeader::from_blob(&header)))
    }

    async fn fetch_ledger_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeader>> {
        let statements = self.statements()?;
        let result = self
            .execute(&statements.select_ledger_hash, (hash.to_vec(),))
            .await?;
        let row = result
            .maybe_first_row_typed::<(i64,)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        match row {
            Some((sequence,)) => self.fetch_ledger_by_sequence(sequence as Sequence).await,
            None => Ok(None),
        }
    }

    async fn fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        let statements = self.statements()?;
        let result = self.execute(&statements.select_range, ()).await?;
        let mut min = None;
        let mut max = None;
        for row in result
            .rows_typed::<(bool, i64)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?
        {
            let (is_latest, sequence) =
                row.map_err(|error| BackendError::Unavailable(error.to_string()))?;
            if is_latest {
                max = Some(sequence as Sequence);
            } else {
                min = Some(sequence as Sequence);
            }
        }
        Ok(match (min, max) {
            (Some(min), Some(max)) => Some(LedgerRange::new(min, max)),
            (None, Some(max)) => Some(LedgerRange::new(max, max)),
            _ => None,
        })
    }

    async fn fetch_ledger_object(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<Blob>> {
        let statements = self.statements()?;
        let result = self
            .execute(
                &statements.select_object,
                (key.to_vec(), sequence_to_db(sequence)),
            )
            .await?;
        let row = result
            .maybe_first_row_typed::<(Vec<u8>,)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(row.map(|(blob,)| blob).filter(|blob| !blob.is_empty()))
    }

    async fn fetch_ledger_objects(
        &self,
        keys: &[LedgerKey],
        sequence: Sequence,
    ) -> Result<Vec<Option<Blob>>> {
        try_join_all(
            keys.iter()
                .map(|key| self.fetch_ledger_object(key, sequence)),
        )
        .await
    }

    async fn fetch_successor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        let statements = self.statements()?;
        let result = self
            .execute(
                &statements.select_successor,
                (key.to_vec(), sequence_to_db(sequence)),
            )
            .await?;
        let row = result
            .maybe_first_row_typed::<(Vec<u8>,)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(row.and_then(|(next,)| LedgerKey::from_slice(&next)))
    }

    async fn fetch_predecessor_key(
        &self,
        _key: &LedgerKey,
        _sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        // Partition keys cannot be scanned backwards in CQL; the writer's
        // predecessor lookups come from the in-memory cache on this
        // backend.
        Err(BackendError::Unavailable(
            "predecessor scans require the in-memory cache on cassandra".to_string(),
        ))
    }

    async fn fetch_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionAndMetadata>> {
        let statements = self.statements()?;
        let result = self
            .execute(&statements.select_transaction, (hash.to_vec(),))
            .await?;
        let row = result
            .maybe_first_row_typed::<(Vec<u8>, Vec<u8>, i64, i64)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(row.map(
            |(transaction, metadata, ledger_sequence, date)| TransactionAndMetadata {
                transaction,
                metadata,
                ledger_sequence: ledger_sequence as Sequence,
                close_time: date as u64,
            },
        ))
    }

    async fn fetch_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Option<TransactionAndMetadata>>> {
        try_join_all(hashes.iter().map(|hash| self.fetch_transaction(hash))).await
    }

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<TransactionAndMetadata>> {
        let hashes = self.fetch_all_transaction_hashes_in_ledger(sequence).await?;
        let transactions = self.fetch_transactions(&hashes).await?;
        Ok(transactions.into_iter().flatten().collect())
    }

    async fn fetch_all_transaction_hashes_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<Hash256>> {
        let statements = self.statements()?;
        let result = self
            .execute(
                &statements.select_ledger_transactions,
                (sequence_to_db(sequence),),
            )
            .await?;
        let mut hashes = Vec::new();
        for row in result
            .rows_typed::<(Vec<u8>,)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?
        {
            let (hash,) = row.map_err(|error| BackendError::Unavailable(error.to_string()))?;
            if let Some(hash) = Hash256::from_slice(&hash) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<AccountTransactionsCursor>)> {
        let statements = self.statements()?;
        let (statement, at) = if forward {
            (
                &statements.select_account_tx_forward,
                cursor.unwrap_or(AccountTransactionsCursor {
                    ledger_sequence: 0,
                    transaction_index: 0,
                }),
            )
        } else {
            (
                &statements.select_account_tx_backward,
                cursor.unwrap_or(AccountTransactionsCursor {
                    ledger_sequence: Sequence::MAX,
                    transaction_index: u32::MAX,
                }),
            )
        };
        let result = self
            .execute(
                statement,
                (
                    account.to_vec(),
                    sequence_to_db(at.ledger_sequence),
                    at.transaction_index as i64,
                    (limit + 1) as i32,
                ),
            )
            .await?;
        let mut positions: Vec<(Sequence, u32, Hash256)> = Vec::new();
        for row in result
            .rows_typed::<(i64, i64, Vec<u8>)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?
        {
            let (sequence, index, hash) =
                row.map_err(|error| BackendError::Unavailable(error.to_string()))?;
            if let Some(hash) = Hash256::from_slice(&hash) {
                positions.push((sequence as Sequence, index as u32, hash));
            }
        }
        let next_cursor = if positions.len() as u32 > limit {
            let (sequence, index, _) = positions[limit as usize];
            positions.truncate(limit as usize);
            Some(AccountTransactionsCursor {
                ledger_sequence: sequence,
                transaction_index: index,
            })
        } else {
            None
        };
        let hashes: Vec<Hash256> = positions.iter().map(|(_, _, hash)| *hash).collect();
        let transactions = self.fetch_transactions(&hashes).await?;
        Ok((transactions.into_iter().flatten().collect(), next_cursor))
    }

    async fn fetch_nft(
        &self,
        token_id: &Hash256,
        sequence: Sequence,
    ) -> Result<Option<NftData>> {
        let statements = self.statements()?;
        let result = self
            .execute(
                &statements.select_nft,
                (token_id.to_vec(), sequence_to_db(sequence)),
            )
            .await?;
        let row = result
            .maybe_first_row_typed::<(i64, Vec<u8>, bool, Option<Vec<u8>>)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(row.and_then(|(row_sequence, owner, is_burned, uri)| {
            Some(NftData {
                token_id: *token_id,
                ledger_sequence: row_sequence as Sequence,
                owner: AccountId::from_slice(&owner)?,
                is_burned,
                uri,
            })
        }))
    }

    async fn fetch_nft_transactions(
        &self,
        token_id: &Hash256,
        limit: u32,
        forward: bool,
        cursor: Option<NftTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<NftTransactionsCursor>)> {
        let statements = self.statements()?;
        let (statement, at) = if forward {
            (
                &statements.select_nft_tx_forward,
                cursor.unwrap_or(NftTransactionsCursor {
                    ledger_sequence: 0,
                    transaction_index: 0,
                }),
            )
        } else {
            (
                &statements.select_nft_tx_backward,
                cursor.unwrap_or(NftTransactionsCursor {
                    ledger_sequence: Sequence::MAX,
                    transaction_index: u32::MAX,
                }),
            )
        };
        let result = self
            .execute(
                statement,
                (
                    token_id.to_vec(),
                    sequence_to_db(at.ledger_sequence),
                    at.transaction_index as i64,
                    (limit + 1) as i32,
                ),
            )
            .await?;
        let mut positions: Vec<(Sequence, u32, Hash256)> = Vec::new();
        for row in result
            .rows_typed::<(i64, i64, Vec<u8>)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?
        {
            let (sequence, index, hash) =
                row.map_err(|error| BackendError::Unavailable(error.to_string()))?;
            if let Some(hash) = Hash256::from_slice(&hash) {
                positions.push((sequence as Sequence, index as u32, hash));
            }
        }
        let next_cursor = if positions.len() as u32 > limit {
            let (sequence, index, _) = positions[limit as usize];
            positions.truncate(limit as usize);
            Some(NftTransactionsCursor {
                ledger_sequence: sequence,
                transaction_index: index,
            })
        } else {
            None
        };
        let hashes: Vec<Hash256> = positions.iter().map(|(_, _, hash)| *hash).collect();
        let transactions = self.fetch_transactions(&hashes).await?;
        Ok((transactions.into_iter().flatten().collect(), next_cursor))
    }

    async fn write_ledger_header(&self, header: &LedgerHeader) -> Result<()> {
        let statements = self.statements()?;
        self.execute(
            &statements.insert_ledger,
            (sequence_to_db(header.sequence), header.to_blob()),
        )
        .await?;
        self.execute(
            &statements.insert_ledger_hash,
            (header.hash.to_vec(), sequence_to_db(header.sequence)),
        )
        .await?;
        Ok(())
    }

    async fn write_ledger_objects(&self, objects: &[ObjectWrite]) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(objects.iter().map(|object| async move {
            self.execute(
                &statements.insert_object,
                (
                    object.key.to_vec(),
                    sequence_to_db(object.sequence),
                    object.blob.clone(),
                ),
            )
            .await?;
            self.execute(
                &statements.insert_diff,
                (
                    sequence_to_db(object.sequence),
                    object.key.to_vec(),
                    object.blob.clone(),
                ),
            )
            .await
        }))
        .await?;
        Ok(())
    }

    async fn fetch_ledger_diff(&self, sequence: Sequence) -> Result<Vec<LedgerObject>> {
        let statements = self.statements()?;
        let result = self
            .execute(&statements.select_diff, (sequence_to_db(sequence),))
            .await?;
        let mut objects = Vec::new();
        for row in result
            .rows_typed::<(Vec<u8>, Vec<u8>)>()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?
        {
            let (key, blob) =
                row.map_err(|error| BackendError::Unavailable(error.to_string()))?;
            if let Some(key) = LedgerKey::from_slice(&key) {
                objects.push(LedgerObject { key, blob });
            }
        }
        Ok(objects)
    }

    async fn write_successors(&self, successors: &[SuccessorWrite]) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(successors.iter().map(|successor| {
            self.execute(
                &statements.insert_successor,
                (
                    successor.key.to_vec(),
                    sequence_to_db(successor.sequence),
                    successor.successor.to_vec(),
                ),
            )
        }))
        .await?;
        Ok(())
    }

    async fn write_transactions(&self, transactions: &[TransactionWrite]) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(transactions.iter().map(|tx| async move {
            self.execute(
                &statements.insert_transaction,
                (
                    tx.hash.to_vec(),
                    sequence_to_db(tx.ledger_sequence),
                    tx.close_time as i64,
                    tx.transaction.clone(),
                    tx.metadata.clone(),
                ),
            )
            .await?;
            self.execute(
                &statements.insert_ledger_transaction,
                (sequence_to_db(tx.ledger_sequence), tx.hash.to_vec()),
            )
            .await
        }))
        .await?;
        Ok(())
    }

    async fn write_account_transactions(
        &self,
        rows: &[AccountTransactionData],
    ) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(rows.iter().map(|row| {
            self.execute(
                &statements.insert_account_tx,
                (
                    row.account.to_vec(),
                    sequence_to_db(row.ledger_sequence),
                    row.transaction_index as i64,
                    row.transaction_hash.to_vec(),
                ),
            )
        }))
        .await?;
        Ok(())
    }

    async fn write_nfts(&self, rows: &[NftData]) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(rows.iter().map(|row| {
            self.execute(
                &statements.insert_nft,
                (
                    row.token_id.to_vec(),
                    sequence_to_db(row.ledger_sequence),
                    row.owner.to_vec(),
                    row.is_burned,
                    row.uri.clone(),
                ),
            )
        }))
        .await?;
        Ok(())
    }

    async fn write_nft_transactions(&self, rows: &[NftTransactionData]) -> Result<()> {
        let statements = self.statements()?;
        try_join_all(rows.iter().map(|row| {
            self.execute(
                &statements.insert_nft_tx,
                (
                    row.token_id.to_vec(),
                    sequence_to_db(row.ledger_sequence),
                    row.transaction_index as i64,
                    row.transaction_hash.to_vec(),
                ),
            )
        }))
        .await?;
        Ok(())
    }

    async fn update_ledger_range(
        &self,
        new_max: Sequence,
        expected_prior: Option<Sequence>,
    ) -> Result<bool> {
        let statements = self.statements()?;
        match expected_prior {
            Some(prior) => {
                let result = self
                    .execute(
                        &statements.update_range_conditional,
                        (sequence_to_db(new_max), sequence_to_db(prior)),
                    )
                    .await?;
                Ok(applied(&result))
            },
            None => {
                let result = self
                    .execute(
                        &statements.insert_range_if_absent,
                        (true, sequence_to_db(new_max)),
                    )
                    .await?;
                if !applied(&result) {
                    return Ok(false);
                }
                self.execute(&statements.insert_range_min, (sequence_to_db(new_max),))
                    .await?;
                Ok(true)
            },
        }
    }

    async fn update_ledger_range_min(&self, new_min: Sequence) -> Result<()> {
        let statements = self.statements()?;
        self.execute(&statements.insert_range_min, (sequence_to_db(new_min),))
            .await?;
        Ok(())
    }

    fn supports_online_delete(&self) -> bool {
        false
    }

    async fn delete_before(&self, keep_min: Sequence) -> Result<()> {
        // Range deletes across partitions are not expressible in CQL; the
        // TTL knob is the supported reclamation path on this backend.
        warn!(
            keep_min = keep_min,
            "online delete is not supported on the cassandra backend; \
             configure a TTL instead"
        );
        Err(BackendError::InvalidRequest(
            "online delete is not supported on the cassandra backend".to_string(),
        ))
    }
}
