//! # pglayer
//!
//! A descriptor-driven PostgreSQL data-access layer.
//!
//! Four subsystems share one data model (the record descriptor) and one
//! execution abstraction (the envelope):
//!
//! - **Schema migrator**: diff descriptors against the live schema, apply
//!   a safe plan transactionally under an advisory lock; file-based and
//!   code-based up/down migrations with safety gates.
//! - **Query builder**: fluent, single-use SELECT/INSERT/UPDATE/DELETE with
//!   joins, keyset pagination, RETURNING, ON CONFLICT, named/positional
//!   parameters, and automatic soft-delete scoping.
//! - **Repository**: CRUD, partial update, binary-COPY bulk insert,
//!   optimistic locking, soft-delete lifecycle, upsert, paging.
//! - **Execution envelope**: retry, circuit breaker, read/primary routing,
//!   SQLSTATE error mapping, slow-query logging, metrics, optional
//!   read-through cache.
//!
//! ## Example
//!
//! ```ignore
//! use pglayer::{Config, Hooks, record};
//!
//! record! {
//!     #[derive(Debug, Clone)]
//!     pub struct User {
//!         id: i64 => "primary_key,auto_increment",
//!         email: String => "unique,not_null",
//!         deleted_at: Option<chrono::DateTime<chrono::Utc>> => "",
//!         version: i64 => "version",
//!     }
//! }
//! impl Hooks for User {}
//!
//! # async fn demo() -> pglayer::DbResult<()> {
//! let db = Config::new().database("app").username("app").connect()?;
//! db.migrator().register::<User>()?.auto_migrate().await?;
//!
//! let users = db.repository::<User>();
//! let id = users.create(&user).await?;
//! let found = users.get_by_id(id.unwrap()).await?;
//! # Ok(()) }
//! ```

pub mod cond;

mod breaker;
mod cache;
mod client;
mod config;
mod descriptor;
mod envelope;
mod error;
mod hooks;
mod ident;
mod metrics;
mod migrate;
mod placeholder;
mod qb;
mod repo;
mod row;
mod stmt_cache;
mod txn;
mod value;

pub use breaker::{BreakerConfig, CircuitBreaker, Phase};
pub use cache::{MemoryCache, QueryCache};
pub use client::Db;
pub use cond::Cond;
pub use config::{Config, LogMode};
pub use descriptor::{
    ColumnType, FieldDescriptor, FieldSpec, ForeignKeySpec, IndexSpec, Record, TableDescriptor,
    TypeInfo, descriptor_for,
};
pub use error::{DbError, DbResult, ErrorCode};
pub use hooks::{AuditEntry, AuditHook, Hooks};
pub use metrics::{CountingMetrics, MetricsSink, NoopMetrics};
pub use migrate::{
    CodeMigrationFn, MigrateOptions, MigrationRegistry, Migrator, PlanResult, format_plan,
};
pub use placeholder::{NamedArgs, convert_named, convert_positional, renumber_placeholders};
pub use qb::{BuiltQuery, QueryBuilder};
pub use repo::{Page, PageRequest, Repository};
pub use row::{FromRow, JsonMap, RowExt, row_to_map, rows_to_maps};
pub use txn::{DbTransaction, IsolationLevel, TxOptions};
pub use value::{Arg, ArgKind, IntoArg};

pub use ident::{quote_ident, quote_qualified};

/// Re-export of the driver's row type, used by [`FromRow`].
pub use tokio_postgres::Row;
