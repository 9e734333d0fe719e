//! Storage-client seam. Repository code talks to [`Store`] / [`StoreTx`]; [`PgStore`] is the
//! PostgreSQL implementation over a shared sqlx pool.

mod postgres;
#[cfg(test)]
pub(crate) mod recording;

pub use postgres::PgStore;

use crate::error::RepoError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Shared database handle. Must be safe for concurrent use; each call to `begin` yields an
/// independent transaction.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepoError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RepoError>;
}

/// One open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTx: Send {
    /// Runs a row-returning statement. Each row arrives as one JSON object keyed by column.
    async fn fetch_rows(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, RepoError>;

    /// Runs a single-value `COUNT(*)` statement.
    async fn fetch_count(&mut self, q: &QueryBuf) -> Result<u64, RepoError>;

    /// Rows affected.
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepoError>;
}

/// Transaction scope for one repository call: commit on `Ok`, rollback on `Err`.
pub struct TxScope {
    tx: Box<dyn StoreTx>,
}

impl TxScope {
    pub async fn begin(store: &dyn Store) -> Result<Self, RepoError> {
        Ok(TxScope {
            tx: store.begin().await?,
        })
    }

    pub fn tx(&mut self) -> &mut dyn StoreTx {
        self.tx.as_mut()
    }

    /// Closes the transaction according to `result` and hands the result back. A commit
    /// failure replaces an `Ok`; a rollback failure is logged and the original error kept.
    pub async fn finish<T>(self, result: Result<T, RepoError>) -> Result<T, RepoError> {
        match result {
            Ok(v) => {
                self.tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = self.tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// First row, if any.
pub(crate) async fn fetch_optional(
    tx: &mut dyn StoreTx,
    q: &QueryBuf,
) -> Result<Option<Map<String, Value>>, RepoError> {
    Ok(tx.fetch_rows(q).await?.into_iter().next())
}
