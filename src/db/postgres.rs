//! PostgreSQL implementation of the `DatabaseManager` capability set.
//!
//! Every public operation follows the same shape: resolve credentials, open a
//! fresh connection, run inside one transaction, commit, close. A failure at
//! any point drops the open transaction, which the server rolls back, and the
//! connection is closed on the error path as well.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::SinkExt;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use crate::db::credentials::{CredentialProvider, Credentials};
use crate::db::sql;
use crate::db::{DatabaseManager, DbError, Record, RecordSet, Result, Value};

/// Read size when streaming a file through COPY.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// A live connection owned by exactly one operation.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Drops the client and waits for the background driver to wind down.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.driver.await {
            warn!("Postgres connection task ended abnormally: {}", e);
        }
    }
}

pub struct DatabasePostgres {
    credentials: Box<dyn CredentialProvider>,
}

impl DatabasePostgres {
    pub fn new(credentials: Box<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }

    pub fn get_credentials(&self) -> Result<Credentials> {
        self.credentials.get_credentials()
    }

    pub async fn get_connection(&self, credentials: &Credentials) -> Result<PgConnection> {
        let (client, connection) = credentials.to_pg_config().connect(NoTls).await.map_err(|e| {
            DbError::Connection(format!("cannot connect to {}: {}", credentials.target(), e))
        })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Postgres connection error: {}", e);
            }
        });

        debug!("Connected to PostgreSQL at {}", credentials.target());
        Ok(PgConnection { client, driver })
    }

    async fn open(&self) -> Result<PgConnection> {
        let credentials = self.get_credentials()?;
        self.get_connection(&credentials).await
    }
}

fn as_params<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<&'a (dyn ToSql + Sync)> {
    values
        .into_iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect()
}

async fn run_execute(client: &mut Client, query: &str) -> Result<u64> {
    let tx = client.transaction().await.map_err(DbError::query)?;
    // Simple-query protocol so multi-statement scripts go through untouched
    let messages = tx.simple_query(query).await.map_err(DbError::query)?;
    tx.commit().await.map_err(DbError::query)?;

    let affected = messages
        .iter()
        .rev()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(*n),
            _ => None,
        })
        .unwrap_or(0);
    Ok(affected)
}

// `limit` stops the read after that many rows through a suspended portal
async fn run_select(
    client: &mut Client,
    query: &str,
    params: Option<&Record>,
    limit: Option<usize>,
) -> Result<RecordSet> {
    let (sql, values) = sql::bind_named(query, params)?;

    let tx = client
        .build_transaction()
        .read_only(true)
        .start()
        .await
        .map_err(DbError::query)?;
    let statement = tx.prepare(&sql).await.map_err(DbError::query)?;

    let columns = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let params = as_params(values.iter().copied());
    let rows = match limit {
        None => tx.query(&statement, &params).await,
        Some(0) => Ok(Vec::new()),
        Some(n) => {
            let portal = tx.bind(&statement, &params).await.map_err(DbError::query)?;
            tx.query_portal(&portal, i32::try_from(n).unwrap_or(i32::MAX)).await
        }
    }
    .map_err(DbError::query)?;

    let mut result = RecordSet::new(columns);
    for row in &rows {
        let values = (0..row.len())
            .map(|i| row.try_get::<_, Value>(i))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DbError::query)?;
        result.push_row(values);
    }

    tx.commit().await.map_err(DbError::query)?;
    Ok(result)
}

async fn run_insert(
    client: &mut Client,
    schema: &str,
    table: &str,
    rows: &[Vec<&Value>],
    columns: &[String],
) -> Result<u64> {
    let tx = client.transaction().await.map_err(DbError::query)?;
    let mut inserted = 0;

    for batch in rows.chunks(sql::rows_per_statement(columns.len())) {
        let query = sql::build_insert(schema, table, columns, batch.len());
        let params = as_params(batch.iter().flatten().copied());
        inserted += tx
            .execute(query.as_str(), &params)
            .await
            .map_err(DbError::query)?;
    }

    tx.commit().await.map_err(DbError::query)?;
    Ok(inserted)
}

/// Lines every record up with `columns` by name. A record must carry exactly
/// those keys, in any order.
fn align_records<'a>(records: &'a [Record], columns: &[String]) -> Result<Vec<Vec<&'a Value>>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let row = columns
                .iter()
                .map(|column| {
                    record.get(column).ok_or_else(|| {
                        DbError::Query(format!("record {} has no value for column \"{}\"", i, column))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if record.len() != columns.len() {
                let extra: Vec<&str> = record
                    .columns()
                    .filter(|name| !columns.iter().any(|c| c.as_str() == *name))
                    .collect();
                return Err(DbError::Query(format!(
                    "record {} has {} values but {} columns were given (unexpected: {})",
                    i,
                    record.len(),
                    columns.len(),
                    extra.join(", ")
                )));
            }
            Ok(row)
        })
        .collect()
}

async fn run_update(
    client: &mut Client,
    schema: &str,
    table: &str,
    records: &[Record],
    predicate: &str,
) -> Result<u64> {
    let tx = client.transaction().await.map_err(DbError::query)?;
    let mut last = 0;

    for record in records {
        let query = sql::build_update(schema, table, record.columns(), predicate);
        last = tx
            .execute(query.as_str(), &as_params(record.values()))
            .await
            .map_err(DbError::query)?;
    }

    tx.commit().await.map_err(DbError::query)?;
    Ok(last)
}

async fn run_delete(client: &mut Client, query: &str) -> Result<u64> {
    let tx = client.transaction().await.map_err(DbError::query)?;
    let deleted = tx.execute(query, &[]).await.map_err(DbError::query)?;
    tx.commit().await.map_err(DbError::query)?;
    Ok(deleted)
}

async fn run_copy(client: &mut Client, copy_sql: &str, filepath: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(filepath).await?;

    let tx = client.transaction().await.map_err(DbError::query)?;
    let sink = tx
        .copy_in::<_, bytes::Bytes>(copy_sql)
        .await
        .map_err(DbError::query)?;
    tokio::pin!(sink);

    let mut buf = BytesMut::with_capacity(COPY_CHUNK_SIZE);
    loop {
        buf.reserve(COPY_CHUNK_SIZE);
        if file.read_buf(&mut buf).await? == 0 {
            break;
        }
        sink.send(buf.split().freeze())
            .await
            .map_err(DbError::query)?;
    }

    let rows = sink.finish().await.map_err(DbError::query)?;
    tx.commit().await.map_err(DbError::query)?;
    Ok(rows)
}

/// Header check before any data is sent: the file must be readable and its
/// header must have one field per target column.
fn check_header(filepath: &Path, expected: usize, delimiter: char) -> Result<()> {
    let file = std::fs::File::open(filepath)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| DbError::Query(format!("cannot read header of {}: {}", filepath.display(), e)))?;
    if headers.len() != expected {
        return Err(DbError::Query(format!(
            "{} has {} header fields but {} columns were given",
            filepath.display(),
            headers.len(),
            expected
        )));
    }
    Ok(())
}

#[async_trait]
impl DatabaseManager for DatabasePostgres {
    async fn execute(&self, query: &str) -> Result<u64> {
        let mut conn = self.open().await?;
        let result = run_execute(conn.client(), query).await;
        conn.close().await;

        let affected = result?;
        debug!("Statement affected {} rows", affected);
        Ok(affected)
    }

    async fn select(&self, query: &str, params: Option<&Record>) -> Result<RecordSet> {
        let mut conn = self.open().await?;
        let result = run_select(conn.client(), query, params, None).await;
        conn.close().await;

        let records = result?;
        debug!(
            "Query returned {} rows with columns {:?}",
            records.len(),
            records.columns
        );
        Ok(records)
    }

    async fn select_head(
        &self,
        query: &str,
        params: Option<&Record>,
        limit: usize,
    ) -> Result<RecordSet> {
        let mut conn = self.open().await?;
        let result = run_select(conn.client(), query, params, Some(limit)).await;
        conn.close().await;

        let records = result?;
        debug!("Read the first {} of at most {} rows", records.len(), limit);
        Ok(records)
    }

    async fn insert_many(
        &self,
        schema: &str,
        table: &str,
        records: &[Record],
        column_names: &str,
    ) -> Result<u64> {
        if records.is_empty() {
            warn!("No data to insert into {}.{}", schema, table);
            return Ok(0);
        }

        let columns = sql::parse_column_list(column_names);
        if columns.is_empty() {
            return Err(DbError::Query("insert_many needs at least one column name".to_string()));
        }
        let rows = align_records(records, &columns)?;

        let mut conn = self.open().await?;
        let result = run_insert(conn.client(), schema, table, &rows, &columns).await;
        conn.close().await;

        let inserted = result?;
        info!("Inserted {} rows into {}.{}", inserted, schema, table);
        Ok(inserted)
    }

    async fn update(
        &self,
        schema: &str,
        table: &str,
        records: &[Record],
        predicate: &str,
    ) -> Result<u64> {
        if records.is_empty() {
            warn!("No data to update in {}.{}", schema, table);
            return Ok(0);
        }
        if records.iter().any(Record::is_empty) {
            return Err(DbError::Query("cannot update with an empty record".to_string()));
        }

        let mut conn = self.open().await?;
        let result = run_update(conn.client(), schema, table, records, predicate).await;
        conn.close().await;

        let last = result?;
        info!(
            "Applied {} updates to {}.{}, last statement touched {} rows",
            records.len(),
            schema,
            table,
            last
        );
        Ok(last)
    }

    async fn delete(&self, schema: &str, table: &str, predicate: &str) -> Result<u64> {
        let query = sql::build_delete(schema, table, predicate);

        let mut conn = self.open().await?;
        let result = run_delete(conn.client(), &query).await;
        conn.close().await;

        let deleted = result?;
        info!("Deleted {} rows from {}.{}", deleted, schema, table);
        Ok(deleted)
    }

    async fn execute_script(&self, path: &Path) -> Result<()> {
        let script = tokio::fs::read_to_string(path).await?;
        info!("Executing SQL script {}", path.display());
        self.execute(&script).await?;
        Ok(())
    }

    async fn copy(
        &self,
        filepath: &Path,
        table: &str,
        schema: &str,
        columns: &[String],
        delimiter: char,
    ) -> Result<bool> {
        let copy_sql = sql::build_copy(schema, table, columns, delimiter)?;

        // Header sniffing is blocking file IO
        let header_path = filepath.to_path_buf();
        let expected = columns.len();
        tokio::task::spawn_blocking(move || check_header(&header_path, expected, delimiter))
            .await
            .map_err(|e| DbError::Query(format!("header check task failed: {}", e)))??;

        let mut conn = self.open().await?;
        let result = run_copy(conn.client(), &copy_sql, filepath).await;
        conn.close().await;

        let rows = result?;
        info!(
            "Copied {} rows from {} into {}.{}",
            rows,
            filepath.display(),
            schema,
            table
        );
        Ok(true)
    }
}
