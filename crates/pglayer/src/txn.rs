//! Transactions.
//!
//! [`DbTransaction`] owns a pooled connection with an open transaction.
//! Builders and repositories obtained from it execute on that connection
//! through the same envelope discipline (breaker included). Prefer
//! [`Db::with_transaction`](crate::Db::with_transaction), which commits on
//! `Ok` and rolls back on `Err`; `begin`/`commit`/`rollback` are the manual
//! escape hatch. A handle dropped without resolution is rolled back in the
//! background.

use std::sync::Arc;

use crate::descriptor::Record;
use crate::envelope::Envelope;
use crate::error::{DbResult, map_db_error};
use crate::qb::QueryBuilder;
use crate::repo::Repository;
use crate::value::Arg;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// PostgreSQL default.
    ReadCommitted,
    /// Snapshot reads.
    RepeatableRead,
    /// Full serializability; expect `Transaction`-class retries.
    Serializable,
}

impl IsolationLevel {
    fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for [`Db::begin`](crate::Db::begin).
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    /// Isolation level; `None` keeps the server default.
    pub isolation: Option<IsolationLevel>,
    /// Open the transaction read-only.
    pub read_only: bool,
    /// DEFERRABLE (meaningful only with serializable read-only).
    pub deferrable: bool,
}

impl TxOptions {
    fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(isolation.as_sql());
        }
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

/// An open transaction on a pooled connection.
pub struct DbTransaction {
    envelope: Arc<Envelope>,
    client: Option<deadpool_postgres::Client>,
    resolved: bool,
}

impl DbTransaction {
    pub(crate) async fn begin(envelope: Arc<Envelope>, options: TxOptions) -> DbResult<Self> {
        let client = envelope.acquire(crate::envelope::Route::Primary).await?;
        let begin = options.begin_sql();
        client
            .batch_execute(&begin)
            .await
            .map_err(|e| map_db_error(e, Some(&begin), Vec::new()))?;
        Ok(Self {
            envelope,
            client: Some(client),
            resolved: false,
        })
    }

    pub(crate) fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub(crate) fn envelope_arc(&self) -> Arc<Envelope> {
        self.envelope.clone()
    }

    pub(crate) fn client(&self) -> &deadpool_postgres::Client {
        self.client.as_ref().expect("transaction connection")
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> DbResult<()> {
        self.resolved = true;
        self.client()
            .batch_execute("COMMIT")
            .await
            .map_err(|e| map_db_error(e, Some("COMMIT"), Vec::new()))
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.resolved = true;
        self.client()
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| map_db_error(e, Some("ROLLBACK"), Vec::new()))
    }

    /// A builder targeting a raw table name, bound to this transaction.
    pub fn table(&self, name: &str) -> QueryBuilder<'_> {
        QueryBuilder::for_tx(self).table(name)
    }

    /// A builder targeting a quoted table name, bound to this transaction.
    pub fn table_quoted(&self, name: &str) -> QueryBuilder<'_> {
        QueryBuilder::for_tx(self).table_quoted(name)
    }

    /// A builder bound to a record type's table, bound to this transaction.
    pub fn model<T: Record>(&self) -> DbResult<QueryBuilder<'_>> {
        QueryBuilder::for_tx(self).model::<T>()
    }

    /// A raw-SQL builder bound to this transaction.
    pub fn raw(&self, sql: impl Into<String>, args: Vec<Arg>) -> QueryBuilder<'_> {
        QueryBuilder::for_tx(self).raw(sql, args)
    }

    /// A repository bound to this transaction.
    pub fn repository<T: Record>(&self) -> Repository<'_, T> {
        Repository::for_tx(self)
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let Some(client) = self.client.take() else {
            return;
        };
        // Unresolved handle: roll back in the background so the pooled
        // connection is not recycled with an open transaction.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(target: "pglayer::txn", error = %err, "rollback on drop failed");
                }
            });
        }
    }
}
