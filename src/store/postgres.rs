//! sqlx-backed store.

use super::{Store, StoreTx};
use crate::error::RepoError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};

/// Cloning shares the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepoError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<(), RepoError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn into_object(doc: Value) -> Result<Map<String, Value>, RepoError> {
    match doc {
        Value::Object(m) => Ok(m),
        other => Err(RepoError::Storage(sqlx::Error::Protocol(format!(
            "expected a JSON row, got {}",
            other
        )))),
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn fetch_rows(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, RepoError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query_scalar::<Postgres, Value>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let docs = query.fetch_all(&mut *self.tx).await?;
        docs.into_iter().map(into_object).collect()
    }

    async fn fetch_count(&mut self, q: &QueryBuf) -> Result<u64, RepoError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "count (tx)");
        let mut query = sqlx::query_scalar::<Postgres, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let n = query.fetch_one(&mut *self.tx).await?;
        Ok(n.max(0) as u64)
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, RepoError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute (tx)");
        let mut query = sqlx::query::<Postgres>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let done = query.execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        let PgTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
