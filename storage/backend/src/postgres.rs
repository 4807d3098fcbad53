// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Postgres backend. Same logical tables as the Cassandra backend, with the
//! conditional tip advance expressed as a guarded UPDATE whose row count is
//! the applied/conflict signal. Connections live in a small round-robin
//! pool; every session runs under a 10s statement timeout.

use crate::{
    error::{BackendError, Result},
    store::{
        Backend, NftTransactionsCursor, ObjectWrite, SuccessorWrite, TransactionWrite,
    },
};
use async_trait::async_trait;
use quill_config::PostgresConfig;
use quill_types::{
    AccountId, AccountTransactionData, AccountTransactionsCursor, Blob, Hash256, LedgerHeader,
    LedgerKey, LedgerObject, LedgerRange, NftData, NftTransactionData, Sequence,
    TransactionAndMetadata,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_postgres::{error::SqlState, Client, NoTls};
use tracing::{error, info};

pub struct PostgresBackend {
    config: PostgresConfig,
    clients: Mutex<Vec<Arc<Mutex<Client>>>>,
    next_client: AtomicUsize,
}

impl PostgresBackend {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(Vec::new()),
            next_client: AtomicUsize::new(0),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.config.table_prefix, name)
    }

    fn connection_string(&self, host: &str) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            host, self.config.port, self.config.user, self.config.password,
            self.config.database
        )
    }

    async fn connect_one(&self) -> Result<Client> {
        let mut last_error = None;
        for host in &self.config.contact_points {
            match tokio_postgres::connect(&self.connection_string(host), NoTls).await {
                Ok((client, connection)) => {
                    tokio::spawn(async move {
                        if let Err(connection_error) = connection.await {
                            error!(error = %connection_error, "postgres connection closed");
                        }
                    });
                    client
                        .batch_execute("SET statement_timeout = 10000")
                        .await
                        .map_err(map_pg_error)?;
                    return Ok(client);
                },
                Err(connect_error) => last_error = Some(connect_error),
            }
        }
        Err(BackendError::Unavailable(
            last_error
                .map(|connect_error| connect_error.to_string())
                .unwrap_or_else(|| "no postgres contact points".to_string()),
        ))
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<Client>> {
        let clients = self.clients.lock().await;
        if clients.is_empty() {
            return Err(BackendError::Unavailable(
                "postgres backend not open".to_string(),
            ));
        }
        let at = self.next_client.fetch_add(1, Ordering::Relaxed) % clients.len();
        let client = clients[at].clone();
        drop(clients);
        Ok(client.lock_owned().await)
    }

    async fn create_schema(&self, client: &Client) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {ledgers} (\
                 sequence bigint PRIMARY KEY, header bytea NOT NULL);\
             CREATE TABLE IF NOT EXISTS {hashes} (\
                 hash bytea PRIMARY KEY, sequence bigint NOT NULL);\
             CREATE TABLE IF NOT EXISTS {objects} (\
                 key bytea, sequence bigint, object bytea NOT NULL, \
                 PRIMARY KEY (key, sequence));\
             CREATE INDEX IF NOT EXISTS {objects_by_sequence} \
                 ON {objects} (sequence);\
             CREATE TABLE IF NOT EXISTS {successor} (\
                 key bytea, sequence bigint, next bytea NOT NULL, \
                 PRIMARY KEY (key, sequence));\
             CREATE TABLE IF NOT EXISTS {transactions} (\
                 hash bytea PRIMARY KEY, ledger_sequence bigint NOT NULL, \
                 date bigint NOT NULL, transaction bytea NOT NULL, \
                 metadata bytea NOT NULL);\
             CREATE INDEX IF NOT EXISTS {transactions_by_ledger} \
                 ON {transactions} (ledger_sequence);\
             CREATE TABLE IF NOT EXISTS {account_tx} (\
                 account bytea, ledger_sequence bigint, transaction_index bigint, \
                 hash bytea NOT NULL, \
                 PRIMARY KEY (account, ledger_sequence, transaction_index));\
             CREATE TABLE IF NOT EXISTS {nf_tokens} (\
                 token_id bytea, sequence bigint, owner bytea NOT NULL, \
                 is_burned boolean NOT NULL, uri bytea, \
                 PRIMARY KEY (token_id, sequence));\
             CREATE TABLE IF NOT EXISTS {nft_tx} (\
                 token_id bytea, ledger_sequence bigint, transaction_index bigint, \
                 hash bytea NOT NULL, \
                 PRIMARY KEY (token_id, ledger_sequence, transaction_index));\
             CREATE TABLE IF NOT EXISTS {range} (\
                 id int PRIMARY KEY, min_sequence bigint NOT NULL, \
                 max_sequence bigint NOT NULL);",
            ledgers = self.table("ledgers"),
            hashes = self.table("ledger_hashes"),
            objects = self.table("objects"),
            objects_by_sequence = self.table("objects_by_sequence"),
            successor = self.table("successor"),
            transactions = self.table("transactions"),
            transactions_by_ledger = self.table("transactions_by_ledger"),
            account_tx = self.table("account_tx"),
            nf_tokens = self.table("nf_tokens"),
            nft_tx = self.table("nf_token_transactions"),
            range = self.table("ledger_range"),
        );
        client.batch_execute(&ddl).await.map_err(map_pg_error)
    }
}

fn map_pg_error(pg_error: tokio_postgres::Error) -> BackendError {
    if let Some(state) = pg_error.code() {
        if *state == SqlState::QUERY_CANCELED {
            return BackendError::Timeout;
        }
    }
    BackendError::Unavailable(pg_error.to_string())
}

fn sequence_to_db(sequence: Sequence) -> i64 {
    sequence as i64
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn open(&self) -> Result<()> {
        let mut clients = self.clients.lock().await;
        if !clients.is_empty() {
            return Ok(());
        }
        let first = self.connect_one().await?;
        self.create_schema(&first).await?;
        clients.push(Arc::new(Mutex::new(first)));
        for _ in 1..self.config.threads.max(1) {
            clients.push(Arc::new(Mutex::new(self.connect_one().await?)));
        }
        info!(
            connections = clients.len(),
            database = %self.config.database,
            "postgres backend ready"
        );
        Ok(())
    }

    async fn fetch_ledger_by_sequence(
        &self,
        sequence: Sequence,
    ) -> Result<Option<LedgerHeader>> {
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT header FROM {} WHERE sequence = $1",
                    self.table("ledgers")
                ),
                &[&sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.and_then(|row| LedgerHeader::from_blob(&row.get::<_, Vec<u8>>(0))))
    }

    async fn fetch_ledger_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeader>> {
        let sequence = {
            let client = self.acquire().await?;
            client
                .query_opt(
                    &*format!(
                        "SELECT sequence FROM {} WHERE hash = $1",
                        self.table("ledger_hashes")
                    ),
                    &[&hash.to_vec()],
                )
                .await
                .map_err(map_pg_error)?
                .map(|row| row.get::<_, i64>(0) as Sequence)
        };
        match sequence {
            Some(sequence) => self.fetch_ledger_by_sequence(sequence).await,
            None => Ok(None),
        }
    }

    async fn fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT min_sequence, max_sequence FROM {} WHERE id = 0",
                    self.table("ledger_range")
                ),
                &[],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(|row| {
            LedgerRange::new(
                row.get::<_, i64>(0) as Sequence,
                row.get::<_, i64>(1) as Sequence,
            )
        }))
    }

    async fn fetch_ledger_object(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<Blob>> {
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT object FROM {} WHERE key = $1 AND sequence <= $2 \
                     ORDER BY sequence DESC LIMIT 1",
                    self.table("objects")
                ),
                &[&key.to_vec(), &sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row
            .map(|row| row.get::<_, Vec<u8>>(0))
            .filter(|blob| !blob.is_empty()))
    }

    async fn fetch_ledger_objects(
        &self,
        keys: &[LedgerKey],
        sequence: Sequence,
    ) -> Result<Vec<Option<Blob>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.fetch_ledger_object(key, sequence).await?);
        }
        Ok(results)
    }

    async fn fetch_successor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        // Unlike Cassandra, Postgres can seek from an arbitrary key: take
        // the latest version of every greater key and keep the first live
        // one. The successor table is still written for peers on other
        // backends, but this read path does not depend on it.
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT key FROM (\
                         SELECT DISTINCT ON (key) key, object FROM {} \
                         WHERE key > $1 AND sequence <= $2 \
                         ORDER BY key, sequence DESC\
                     ) latest WHERE octet_length(object) > 0 ORDER BY key LIMIT 1",
                    self.table("objects")
                ),
                &[&key.to_vec(), &sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.and_then(|row| LedgerKey::from_slice(&row.get::<_, Vec<u8>>(0))))
    }

    async fn fetch_predecessor_key(
        &self,
        key: &LedgerKey,
        sequence: Sequence,
    ) -> Result<Option<LedgerKey>> {
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT key FROM (\
                         SELECT DISTINCT ON (key) key, object FROM {} \
                         WHERE key < $1 AND sequence <= $2 \
                         ORDER BY key DESC, sequence DESC\
                     ) latest WHERE octet_length(object) > 0 \
                     ORDER BY key DESC LIMIT 1",
                    self.table("objects")
                ),
                &[&key.to_vec(), &sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.and_then(|row| LedgerKey::from_slice(&row.get::<_, Vec<u8>>(0))))
    }

    async fn fetch_ledger_diff(&self, sequence: Sequence) -> Result<Vec<LedgerObject>> {
        let client = self.acquire().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT key, object FROM {} WHERE sequence = $1 ORDER BY key",
                    self.table("objects")
                ),
                &[&sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(LedgerObject {
                    key: LedgerKey::from_slice(&row.get::<_, Vec<u8>>(0))?,
                    blob: row.get::<_, Vec<u8>>(1),
                })
            })
            .collect())
    }

    async fn fetch_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionAndMetadata>> {
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT transaction, metadata, ledger_sequence, date FROM {} \
                     WHERE hash = $1",
                    self.table("transactions")
                ),
                &[&hash.to_vec()],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(|row| TransactionAndMetadata {
            transaction: row.get::<_, Vec<u8>>(0),
            metadata: row.get::<_, Vec<u8>>(1),
            ledger_sequence: row.get::<_, i64>(2) as Sequence,
            close_time: row.get::<_, i64>(3) as u64,
        }))
    }

    async fn fetch_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Option<TransactionAndMetadata>>> {
        let mut results = Vec::with_capacity(hashes.len());
        for hash in hashes {
            results.push(self.fetch_transaction(hash).await?);
        }
        Ok(results)
    }

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<TransactionAndMetadata>> {
        let client = self.acquire().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT transaction, metadata, ledger_sequence, date FROM {} \
                     WHERE ledger_sequence = $1",
                    self.table("transactions")
                ),
                &[&sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(rows
            .into_iter()
            .map(|row| TransactionAndMetadata {
                transaction: row.get::<_, Vec<u8>>(0),
                metadata: row.get::<_, Vec<u8>>(1),
                ledger_sequence: row.get::<_, i64>(2) as Sequence,
                close_time: row.get::<_, i64>(3) as u64,
            })
            .collect())
    }

    async fn fetch_all_transaction_hashes_in_ledger(
        &self,
        sequence: Sequence,
    ) -> Result<Vec<Hash256>> {
        let client = self.acquire().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT hash FROM {} WHERE ledger_sequence = $1",
                    self.table("transactions")
                ),
                &[&sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| Hash256::from_slice(&row.get::<_, Vec<u8>>(0)))
            .collect())
    }

    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTransactionsCursor>,
    ) -> Result<(Vec<TransactionAndMetadata>, Option<AccountTransactionsCursor>)> {
        let at = cursor.unwrap_or(if forward {
            AccountTransactionsCursor {
                ledger_sequence: 0,
                transaction_index: 0,
            }
        } else {
            AccountTransactionsCursor {
                ledger_sequence: Sequence::MAX,
                transaction_index: u32::MAX,
            }
        });
        let query = if forward {
            format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE account = $1 AND (ledger_sequence, transaction_index) >= ($2, $3) \
                 ORDER BY ledger_sequence ASC, transaction_index ASC LIMIT $4",
                self.table("account_tx")
            )
        } else {
            format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE account = $1 AND (ledger_sequence, transaction_index) <= ($2, $3) \
                 ORDER BY ledger_sequence DESC, transaction_index DESC LIMIT $4",
                self.table("account_tx")
            )
        };
        let rows = {
            let client = self.acquire().await?;
            client
                .query(
                    query.as_str(),
                    &[
                        &account.to_vec(),
                        &sequence_to_db(at.ledger_sequence),
                        &(at.transaction_index as i64),
                        &((limit + 1) as i64),
                    ],
                )
                .await
                .map_err(map_pg_error)?
        };
        let mut positions: Vec<(Sequence, u32, Hash256)> = rows
            .into_iter()
            .filter_map(|row| {
                let hash = Hash256::from_slice(&row.get::<_, Vec<u8>>(2))?;
                Some((
                    row.get::<_, i64>(0) as Sequence,
                    row.get::<_, i64>(1) as u32,
                    hash,
                ))
            })
            .collect();
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
        let client = self.acquire().await?;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT sequence, owner, is_burned, uri FROM {} \
                     WHERE token_id = $1 AND sequence <= $2 \
                     ORDER BY sequence DESC LIMIT 1",
                    self.table("nf_tokens")
                ),
                &[&token_id.to_vec(), &sequence_to_db(sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.and_then(|row| {
            Some(NftData {
                token_id: *token_id,
                ledger_sequence: row.get::<_, i64>(0) as Sequence,
                owner: AccountId::from_slice(&row.get::<_, Vec<u8>>(1))?,
                is_burned: row.get::<_, bool>(2),
                uri: row.get::<_, Option<Vec<u8>>>(3),
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
        let at = cursor.unwrap_or(if forward {
            NftTransactionsCursor {
                ledger_sequence: 0,
                transaction_index: 0,
            }
        } else {
            NftTransactionsCursor {
                ledger_sequence: Sequence::MAX,
                transaction_index: u32::MAX,
            }
        });
        let query = if forward {
            format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE token_id = $1 AND (ledger_sequence, transaction_index) >= ($2, $3) \
                 ORDER BY ledger_sequence ASC, transaction_index ASC LIMIT $4",
                self.table("nf_token_transactions")
            )
        } else {
            format!(
                "SELECT ledger_sequence, transaction_index, hash FROM {} \
                 WHERE token_id = $1 AND (ledger_sequence, transaction_index) <= ($2, $3) \
                 ORDER BY ledger_sequence DESC, transaction_index DESC LIMIT $4",
                self.table("nf_token_transactions")
            )
        };
        let rows = {
            let client = self.acquire().await?;
            client
                .query(
                    query.as_str(),
                    &[
                        &token_id.to_vec(),
                        &sequence_to_db(at.ledger_sequence),
                        &(at.transaction_index as i64),
                        &((limit + 1) as i64),
                    ],
                )
                .await
                .map_err(map_pg_error)?
        };
        let mut positions: Vec<(Sequence, u32, Hash256)> = rows
            .into_iter()
            .filter_map(|row| {
                let hash = Hash256::from_slice(&row.get::<_, Vec<u8>>(2))?;
                Some((
                    row.get::<_, i64>(0) as Sequence,
                    row.get::<_, i64>(1) as u32,
                    hash,
                ))
            })
            .collect();
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
        let client = self.acquire().await?;
        client
            .execute(
                &*format!(
                    "INSERT INTO {} (sequence, header) VALUES ($1, $2) \
                     ON CONFLICT (sequence) DO UPDATE SET header = EXCLUDED.header",
                    self.table("ledgers")
                ),
                &[&sequence_to_db(header.sequence), &header.to_blob()],
            )
            .await
            .map_err(map_pg_error)?;
        client
            .execute(
                &*format!(
                    "INSERT INTO {} (hash, sequence) VALUES ($1, $2) \
                     ON CONFLICT (hash) DO NOTHING",
                    self.table("ledger_hashes")
                ),
                &[&header.hash.to_vec(), &sequence_to_db(header.sequence)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn write_ledger_objects(&self, objects: &[ObjectWrite]) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (key, sequence, object) VALUES ($1, $2, $3) \
             ON CONFLICT (key, sequence) DO UPDATE SET object = EXCLUDED.object",
            self.table("objects")
        );
        for object in objects {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &object.key.to_vec(),
                        &sequence_to_db(object.sequence),
                        &object.blob,
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn write_successors(&self, successors: &[SuccessorWrite]) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (key, sequence, next) VALUES ($1, $2, $3) \
             ON CONFLICT (key, sequence) DO UPDATE SET next = EXCLUDED.next",
            self.table("successor")
        );
        for successor in successors {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &successor.key.to_vec(),
                        &sequence_to_db(successor.sequence),
                        &successor.successor.to_vec(),
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn write_transactions(&self, transactions: &[TransactionWrite]) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (hash, ledger_sequence, date, transaction, metadata) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (hash) DO NOTHING",
            self.table("transactions")
        );
        for tx in transactions {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &tx.hash.to_vec(),
                        &sequence_to_db(tx.ledger_sequence),
                        &(tx.close_time as i64),
                        &tx.transaction,
                        &tx.metadata,
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn write_account_transactions(
        &self,
        rows: &[AccountTransactionData],
    ) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (account, ledger_sequence, transaction_index, hash) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (account, ledger_sequence, transaction_index) DO NOTHING",
            self.table("account_tx")
        );
        for row in rows {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &row.account.to_vec(),
                        &sequence_to_db(row.ledger_sequence),
                        &(row.transaction_index as i64),
                        &row.transaction_hash.to_vec(),
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn write_nfts(&self, rows: &[NftData]) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (token_id, sequence, owner, is_burned, uri) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (token_id, sequence) DO UPDATE \
             SET owner = EXCLUDED.owner, is_burned = EXCLUDED.is_burned, \
                 uri = EXCLUDED.uri",
            self.table("nf_tokens")
        );
        for row in rows {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &row.token_id.to_vec(),
                        &sequence_to_db(row.ledger_sequence),
                        &row.owner.to_vec(),
                        &row.is_burned,
                        &row.uri,
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn write_nft_transactions(&self, rows: &[NftTransactionData]) -> Result<()> {
        let client = self.acquire().await?;
        let statement = format!(
            "INSERT INTO {} (token_id, ledger_sequence, transaction_index, hash) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (token_id, ledger_sequence, transaction_index) DO NOTHING",
            self.table("nf_token_transactions")
        );
        for row in rows {
            client
                .execute(
                    statement.as_str(),
                    &[
                        &row.token_id.to_vec(),
                        &sequence_to_db(row.ledger_sequence),
                        &(row.transaction_index as i64),
                        &row.transaction_hash.to_vec(),
                    ],
                )
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }

    async fn update_ledger_range(
        &self,
        new_max: Sequence,
        expected_prior: Option<Sequence>,
    ) -> Result<bool> {
        let client = self.acquire().await?;
        let affected = match expected_prior {
            Some(prior) => client
                .execute(
                    &*format!(
                        "UPDATE {} SET max_sequence = $1 \
                         WHERE id = 0 AND max_sequence = $2",
                        self.table("ledger_range")
                    ),
                    &[&sequence_to_db(new_max), &sequence_to_db(prior)],
                )
                .await
                .map_err(map_pg_error)?,
            None => client
                .execute(
                    &*format!(
                        "INSERT INTO {} (id, min_sequence, max_sequence) \
                         VALUES (0, $1, $1) ON CONFLICT (id) DO NOTHING",
                        self.table("ledger_range")
                    ),
                    &[&sequence_to_db(new_max)],
                )
                .await
                .map_err(map_pg_error)?,
        };
        Ok(affected == 1)
    }

    async fn update_ledger_range_min(&self, new_min: Sequence) -> Result<()> {
        let client = self.acquire().await?;
        client
            .execute(
                &*format!(
                    "UPDATE {} SET min_sequence = $1 WHERE id = 0",
                    self.table("ledger_range")
                ),
                &[&sequence_to_db(new_min)],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn delete_before(&self, keep_min: Sequence) -> Result<()> {
        let cutoff = sequence_to_db(keep_min);
        let client = self.acquire().await?;
        let deletes = [
            format!("DELETE FROM {} WHERE sequence < $1", self.table("ledgers")),
            format!(
                "DELETE FROM {} WHERE sequence < $1",
                self.table("ledger_hashes")
            ),
            format!("DELETE FROM {} WHERE sequence < $1", self.table("objects")),
            format!(
                "DELETE FROM {} WHERE sequence < $1",
                self.table("successor")
            ),
            format!(
                "DELETE FROM {} WHERE ledger_sequence < $1",
                self.table("transactions")
            ),
            format!(
                "DELETE FROM {} WHERE ledger_sequence < $1",
                self.table("account_tx")
            ),
            format!("DELETE FROM {} WHERE sequence < $1", self.table("nf_tokens")),
            format!(
                "DELETE FROM {} WHERE ledger_sequence < $1",
                self.table("nf_token_transactions")
            ),
        ];
        for statement in &deletes {
            client
                .execute(statement, &[&cutoff])
                .await
                .map_err(map_pg_error)?;
        }
        Ok(())
    }
}
