//! Executor Module
//!
//! Provides the `Executor` trait that abstracts statement execution over `may_postgres`.
//!
//! The version store and the transaction wrapper only ever talk to the database
//! through this trait, so the migration engine never owns or closes the connection.

use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Database error type
#[derive(Debug)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Query execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            DbError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            DbError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            DbError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::PostgresError(err)
    }
}

/// Trait for executing database operations
///
/// Implemented for a direct client connection. Anything that can run a
/// statement on a single session can be used as the target of a migration run;
/// session affinity matters because advisory locks belong to the session.
///
/// # Examples
///
/// ```no_run
/// use tidemark::{connect, DbError, Executor, PgExecutor};
///
/// # fn main() -> Result<(), DbError> {
/// let client = connect("host=localhost user=postgres dbname=mydb")
///     .map_err(|e| DbError::Other(format!("Connection error: {e}")))?;
/// let executor = PgExecutor::new(client);
///
/// executor.execute("CREATE TABLE IF NOT EXISTS users (id BIGINT PRIMARY KEY)", &[])?;
/// let row = executor.query_one("SELECT COUNT(*) FROM users", &[])?;
/// let count: i64 = row.get(0);
/// # Ok(())
/// # }
/// ```
pub trait Executor {
    /// Execute a SQL statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    /// Execute a query that must return exactly one row
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or does not return exactly one row.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError>;
}

/// Implementation of `Executor` for `may_postgres::Client`
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }

    /// Check that the connection answers a trivial query
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `SELECT 1` fails or returns something unexpected.
    pub fn ping(&self) -> Result<(), DbError> {
        let row = self.query_one("SELECT 1", &[])?;
        let one: i32 = row
            .try_get(0)
            .map_err(|e| DbError::ParseError(format!("ping returned unexpected value: {e}")))?;
        if one == 1 {
            Ok(())
        } else {
            Err(DbError::QueryError(format!("ping returned {one}, expected 1")))
        }
    }
}

impl Executor for PgExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(query).entered();

        self.client.execute(query, params).map_err(DbError::PostgresError)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(query).entered();

        self.client.query_one(query, params).map_err(DbError::PostgresError)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(query).entered();

        self.client.query(query, params).map_err(DbError::PostgresError)
    }
}
