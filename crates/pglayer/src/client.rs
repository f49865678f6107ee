//! The `Db` facade.
//!
//! A [`Db`] is a cheap handle over the execution envelope (pools, breaker,
//! retry, sinks). Builders, repositories, the migrator, and transactions all
//! start here.

use std::sync::Arc;

use futures_core::future::BoxFuture;

use crate::descriptor::Record;
use crate::envelope::{Envelope, Source};
use crate::error::{DbError, DbResult};
use crate::migrate::Migrator;
use crate::placeholder::NamedArgs;
use crate::qb::QueryBuilder;
use crate::repo::Repository;
use crate::txn::{DbTransaction, TxOptions};
use crate::value::Arg;

/// Handle to a configured database: pools plus the execution envelope.
#[derive(Clone)]
pub struct Db {
    envelope: Arc<Envelope>,
}

impl Db {
    pub(crate) fn new(envelope: Arc<Envelope>) -> Self {
        Self { envelope }
    }

    fn builder(&self) -> QueryBuilder<'static> {
        QueryBuilder::new(Source::Db(self.envelope.clone()))
    }

    /// A builder targeting a raw table expression.
    pub fn table(&self, name: &str) -> QueryBuilder<'static> {
        self.builder().table(name)
    }

    /// A builder targeting a quoted table name.
    pub fn table_quoted(&self, name: &str) -> QueryBuilder<'static> {
        self.builder().table_quoted(name)
    }

    /// A builder bound to a record type's table (soft-delete aware).
    pub fn model<T: Record>(&self) -> DbResult<QueryBuilder<'static>> {
        self.builder().model::<T>()
    }

    /// A raw-SQL builder with pre-numbered placeholders.
    pub fn raw(&self, sql: impl Into<String>, args: Vec<Arg>) -> QueryBuilder<'static> {
        self.builder().raw(sql, args)
    }

    /// A raw-SQL builder with `:name` placeholders.
    pub fn raw_named(&self, sql: &str, named: &NamedArgs) -> DbResult<QueryBuilder<'static>> {
        self.builder().raw_named(sql, named)
    }

    /// A repository for a record type.
    pub fn repository<T: Record>(&self) -> Repository<'static, T> {
        Repository::new(Source::Db(self.envelope.clone()))
    }

    /// The schema migrator.
    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.envelope.clone())
    }

    /// Open a transaction with explicit options.
    pub async fn begin(&self, options: TxOptions) -> DbResult<DbTransaction> {
        DbTransaction::begin(self.envelope.clone(), options).await
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// # Example
    /// ```ignore
    /// db.with_transaction(|tx| {
    ///     Box::pin(async move {
    ///         tx.repository::<User>().create(&user).await?;
    ///         tx.repository::<AuditLog>().create(&log).await?;
    ///         Ok(())
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t DbTransaction) -> BoxFuture<'t, DbResult<T>>,
    {
        let tx = self.begin(TxOptions::default()).await?;
        match f(&tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(DbError::transaction(format!(
                    "{err} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }

    /// Round-trip check against the primary.
    pub async fn ping(&self) -> DbResult<()> {
        let source = Source::Db(self.envelope.clone());
        self.envelope
            .query(&source, crate::envelope::Route::Primary, "SELECT 1", &[], false)
            .await
            .map(|_| ())
    }
}
