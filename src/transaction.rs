//! Transaction Module
//!
//! A scoped `BEGIN`/`COMMIT` wrapper over any [`Executor`].
//!
//! The transaction borrows the executor for its lifetime. Dropping it without
//! calling [`Transaction::commit`] issues `ROLLBACK`, so an early return with
//! `?` never leaves the session inside an open transaction.

use crate::executor::{DbError, Executor};
use may_postgres::types::ToSql;
use may_postgres::Row;
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction error type
#[derive(Debug)]
pub enum TransactionError {
    /// Database error while running a transaction control statement
    Database(DbError),
    /// Transaction already committed or rolled back
    TransactionClosed,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Database(e) => {
                write!(f, "Transaction error: {}", e)
            }
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<DbError> for TransactionError {
    fn from(err: DbError) -> Self {
        TransactionError::Database(err)
    }
}

impl From<TransactionError> for DbError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Database(e) => e,
            TransactionError::TransactionClosed => DbError::Other("Transaction closed".to_string()),
        }
    }
}

/// A database transaction bound to a borrowed executor
///
/// # Examples
///
/// ```no_run
/// use tidemark::{connect, DbError, Executor, PgExecutor};
/// use tidemark::transaction::Transaction;
///
/// # fn main() -> Result<(), DbError> {
/// # let client = connect("host=localhost user=postgres dbname=mydb")
/// #     .map_err(|e| DbError::Other(format!("Connection error: {e}")))?;
/// let executor = PgExecutor::new(client);
///
/// let tx = Transaction::begin(&executor)?;
/// tx.execute("CREATE TABLE users (id BIGINT PRIMARY KEY)", &[])?;
/// tx.execute("CREATE INDEX users_id_idx ON users (id)", &[])?;
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'a> {
    executor: &'a dyn Executor,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Start a new transaction on the given executor
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Database` if `BEGIN` fails.
    pub fn begin(executor: &'a dyn Executor) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        executor.execute("BEGIN", &[])?;

        Ok(Self {
            executor,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if `COMMIT` fails. The transaction is closed either way;
    /// PostgreSQL rolls back a transaction whose commit failed.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.closed = true;
        self.executor.execute("COMMIT", &[])?;
        Ok(())
    }

    /// Roll the transaction back
    ///
    /// # Errors
    ///
    /// Returns an error if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }
        self.closed = true;
        self.rollback_inner()
    }

    fn rollback_inner(&self) -> Result<(), TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.executor.execute("ROLLBACK", &[])?;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.rollback_inner() {
                log::warn!("Failed to roll back abandoned transaction: {e}");
            }
        }
    }
}

impl Executor for Transaction<'_> {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        self.executor.execute(query, params)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        self.executor.query_one(query, params)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        self.executor.query_all(query, params)
    }
}
