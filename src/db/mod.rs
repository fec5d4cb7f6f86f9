// Relational access layer. Every operation opens its own connection, runs in
// a single transaction and releases the connection before returning, so there
// is no pool and nothing is shared between calls.
pub mod credentials;
pub mod postgres;
pub mod sql;
pub mod value;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use value::{Record, RecordSet, Value};

#[derive(Error, Debug)]
pub enum DbError {
    /// Missing or invalid credentials
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// Store unreachable or credentials rejected
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Malformed SQL, constraint violation or failure mid-statement
    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn query(err: tokio_postgres::Error) -> Self {
        // Prefer the server's own message over the driver's wrapper text
        match err.as_db_error() {
            Some(db) => DbError::Query(format!("{}: {}", db.severity(), db.message())),
            None => DbError::Query(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// The CRUD capability set of a relational engine.
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    /// Runs a statement without bound parameters, commits, and returns the
    /// affected-row count of the last command.
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Runs a read-only statement; `:name` placeholders are bound from `params`.
    async fn select(&self, query: &str, params: Option<&Record>) -> Result<RecordSet>;

    /// Like `select`, but reads at most `limit` rows from the server.
    async fn select_head(
        &self,
        query: &str,
        params: Option<&Record>,
        limit: usize,
    ) -> Result<RecordSet> {
        Ok(self.select(query, params).await?.head(limit))
    }

    /// Inserts all records in one transaction. `column_names` is a comma
    /// separated list; each record must hold exactly those keys, in any order.
    async fn insert_many(
        &self,
        schema: &str,
        table: &str,
        records: &[Record],
        column_names: &str,
    ) -> Result<u64>;

    /// Applies every record with the shared predicate and returns the rowcount
    /// of the last statement only.
    async fn update(
        &self,
        schema: &str,
        table: &str,
        records: &[Record],
        predicate: &str,
    ) -> Result<u64>;

    async fn delete(&self, schema: &str, table: &str, predicate: &str) -> Result<u64>;

    async fn execute_script(&self, path: &Path) -> Result<()>;

    /// Streams a delimited file with a header row into the table.
    async fn copy(
        &self,
        filepath: &Path,
        table: &str,
        schema: &str,
        columns: &[String],
        delimiter: char,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_their_kind() {
        assert!(DbError::Configuration("no host".into())
            .to_string()
            .contains("configuration"));
        assert!(DbError::Connection("refused".into())
            .to_string()
            .contains("connection"));
        assert_eq!(
            DbError::Query("syntax error".into()).to_string(),
            "Query error: syntax error"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: DbError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, DbError::Io(_)));
    }
}
