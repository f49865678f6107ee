//! Schema migrations.
//!
//! Three flavors share one history table and one advisory-lock discipline:
//!
//! - **descriptor-driven** ([`Migrator::plan`] / [`Migrator::auto_migrate`]):
//!   diff registered record descriptors against the live schema and apply
//!   the safe plan transactionally;
//! - **file-based** ([`Migrator::migrate_up_dir`] /
//!   [`Migrator::migrate_down_dir`]): ordered `NNN_desc.up.sql` /
//!   `NNN_desc.down.sql` pairs with safety gates on destructive rollbacks;
//! - **code-based** ([`Migrator::migrate_up_code`] /
//!   [`Migrator::migrate_down_code`]): a version registry of async up/down
//!   callbacks running inside the migration transaction.
//!
//! History lives in `schema_migrations(version BIGINT PRIMARY KEY,
//! applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), checksum TEXT)`. Every
//! flavor runs in a single transaction holding
//! `pg_advisory_xact_lock(MIGRATION_LOCK_KEY)`, so concurrent migrators
//! queue at the lock.

mod code;
mod files;
mod plan;

pub use code::{CodeMigrationFn, MigrationRegistry};
pub use plan::{PlanResult, format_plan};

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::descriptor::{Record, TableDescriptor, descriptor_for};
use crate::envelope::Envelope;
use crate::error::{DbError, DbResult, map_db_error};
use crate::txn::{DbTransaction, TxOptions};

use plan::{LiveColumn, LiveTable, plan_table};

/// Process-wide advisory lock key serializing schema changes.
/// ASCII "pglayer" packed into an i64.
pub(crate) const MIGRATION_LOCK_KEY: i64 = 0x70_67_6c_61_79_65_72;

const HISTORY_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
     version BIGINT PRIMARY KEY, \
     applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
     checksum TEXT)";

/// Migration safety switches. Everything destructive is off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Apply type changes and `SET NOT NULL` tightening.
    pub allow_unsafe: bool,
    /// Apply `DROP COLUMN` statements from descriptor diffs.
    pub allow_drop_columns: bool,
    /// Permit `DROP TABLE` statements in file-based down migrations.
    pub allow_table_drop: bool,
    /// Permit `DROP COLUMN` statements in file-based down migrations.
    pub allow_column_drop: bool,
}

/// SHA-256 of `data` as lowercase hex.
pub(crate) fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

pub(crate) fn migration_err(err: tokio_postgres::Error, sql: &str) -> DbError {
    let mapped = map_db_error(err, Some(sql), Vec::new());
    DbError::migration(mapped.message().to_string())
        .with_query(sql, Vec::new())
        .with_source(mapped)
}

/// The schema migrator: registered descriptors plus safety options.
pub struct Migrator {
    envelope: Arc<Envelope>,
    descriptors: Vec<Arc<TableDescriptor>>,
    options: MigrateOptions,
}

impl Migrator {
    pub(crate) fn new(envelope: Arc<Envelope>) -> Self {
        Self {
            envelope,
            descriptors: Vec::new(),
            options: MigrateOptions::default(),
        }
    }

    /// Replace the safety options.
    pub fn with_options(mut self, options: MigrateOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a record type for descriptor-driven planning.
    pub fn register<T: Record>(mut self) -> DbResult<Self> {
        self.descriptors.push(descriptor_for::<T>()?);
        Ok(self)
    }

    pub(crate) async fn begin(&self) -> DbResult<DbTransaction> {
        let tx = DbTransaction::begin(self.envelope.clone(), TxOptions::default()).await?;
        lock_and_prepare(&tx).await?;
        Ok(tx)
    }

    // ==================== Introspection ====================

    async fn introspect(&self, tx: &DbTransaction, table: &str) -> DbResult<LiveTable> {
        let client = tx.client();

        let columns_sql = "SELECT column_name, data_type, is_nullable, \
             character_maximum_length \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 \
             ORDER BY ordinal_position";
        let rows = client
            .query(columns_sql, &[&table])
            .await
            .map_err(|e| migration_err(e, columns_sql))?;

        let columns = if rows.is_empty() {
            None
        } else {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let is_nullable: String = row.get(2);
                out.push(LiveColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                    is_nullable: is_nullable.eq_ignore_ascii_case("YES"),
                    char_max_len: row.get(3),
                });
            }
            Some(out)
        };

        let index_sql =
            "SELECT indexname FROM pg_indexes WHERE schemaname = 'public' AND tablename = $1";
        let index_names: HashSet<String> = client
            .query(index_sql, &[&table])
            .await
            .map_err(|e| migration_err(e, index_sql))?
            .into_iter()
            .map(|row| row.get(0))
            .collect();

        let constraint_sql = "SELECT constraint_name FROM information_schema.table_constraints \
             WHERE table_schema = 'public' AND table_name = $1";
        let constraint_names: HashSet<String> = client
            .query(constraint_sql, &[&table])
            .await
            .map_err(|e| migration_err(e, constraint_sql))?
            .into_iter()
            .map(|row| row.get(0))
            .collect();

        Ok(LiveTable {
            columns,
            index_names,
            constraint_names,
        })
    }

    // ==================== Planning & application ====================

    /// Diff every registered descriptor against the live schema.
    pub async fn plan(&self) -> DbResult<PlanResult> {
        let tx = self.begin().await?;
        let plan = self.plan_on(&tx).await?;
        tx.rollback().await?;
        Ok(plan)
    }

    async fn plan_on(&self, tx: &DbTransaction) -> DbResult<PlanResult> {
        let mut plan = PlanResult::default();
        let mut deferred_fks = Vec::new();
        for descriptor in &self.descriptors {
            let live = self.introspect(tx, &descriptor.table).await?;
            plan_table(descriptor, &live, &mut plan, &mut deferred_fks);
        }
        plan.statements.extend(deferred_fks);
        Ok(plan)
    }

    /// Plan and apply in one transaction under the advisory lock.
    ///
    /// Safe statements always run; unsafe and destructive statements only
    /// under the matching [`MigrateOptions`] switches. Returns the applied
    /// plan.
    pub async fn auto_migrate(&self) -> DbResult<PlanResult> {
        let tx = self.begin().await?;
        let plan = self.plan_on(&tx).await?;

        let mut applied = String::new();
        for statement in &plan.statements {
            exec_ddl(&tx, statement).await?;
            applied.push_str(statement);
            applied.push('\n');
        }
        if self.options.allow_unsafe {
            for statement in &plan.unsafe_statements {
                exec_ddl(&tx, statement).await?;
                applied.push_str(statement);
                applied.push('\n');
            }
        }
        if self.options.allow_drop_columns {
            for statement in &plan.destructive_statements {
                exec_ddl(&tx, statement).await?;
                applied.push_str(statement);
                applied.push('\n');
            }
        }

        if !applied.is_empty() {
            record_checksum(&tx, &sha256_hex(&applied)).await?;
        }
        tx.commit().await?;
        Ok(plan)
    }
}

/// Take the advisory lock and ensure the history table, inside `tx`.
async fn lock_and_prepare(tx: &DbTransaction) -> DbResult<()> {
    let client = tx.client();
    let lock_sql = "SELECT pg_advisory_xact_lock($1)";
    client
        .query(lock_sql, &[&MIGRATION_LOCK_KEY])
        .await
        .map_err(|e| migration_err(e, lock_sql))?;
    client
        .batch_execute(HISTORY_TABLE_DDL)
        .await
        .map_err(|e| migration_err(e, HISTORY_TABLE_DDL))?;
    Ok(())
}

pub(crate) async fn exec_ddl(tx: &DbTransaction, sql: &str) -> DbResult<()> {
    tx.client()
        .batch_execute(sql)
        .await
        .map_err(|e| migration_err(e, sql))
}

/// Versions already recorded in the history table.
pub(crate) async fn applied_versions(tx: &DbTransaction) -> DbResult<Vec<i64>> {
    let sql = "SELECT version FROM schema_migrations ORDER BY version ASC";
    let rows = tx
        .client()
        .query(sql, &[])
        .await
        .map_err(|e| migration_err(e, sql))?;
    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

/// Insert a history row for an explicit version.
pub(crate) async fn record_version(tx: &DbTransaction, version: i64, checksum: &str) -> DbResult<()> {
    let sql = "INSERT INTO schema_migrations (version, checksum) VALUES ($1, $2)";
    tx.client()
        .execute(sql, &[&version, &checksum])
        .await
        .map_err(|e| migration_err(e, sql))?;
    Ok(())
}

/// Delete the history row of a rolled-back version.
pub(crate) async fn delete_version(tx: &DbTransaction, version: i64) -> DbResult<()> {
    let sql = "DELETE FROM schema_migrations WHERE version = $1";
    let deleted = tx
        .client()
        .execute(sql, &[&version])
        .await
        .map_err(|e| migration_err(e, sql))?;
    if deleted == 0 {
        return Err(DbError::migration(format!(
            "history row for version {version} disappeared"
        )));
    }
    Ok(())
}

/// Record an auto-migrate checksum at `max(version) + 1`, unless the same
/// checksum was already recorded (idempotent re-runs).
async fn record_checksum(tx: &DbTransaction, checksum: &str) -> DbResult<()> {
    let client = tx.client();
    let probe_sql = "SELECT 1 FROM schema_migrations WHERE checksum = $1";
    let existing = client
        .query(probe_sql, &[&checksum])
        .await
        .map_err(|e| migration_err(e, probe_sql))?;
    if !existing.is_empty() {
        return Ok(());
    }

    let insert_sql = "INSERT INTO schema_migrations (version, checksum) \
         VALUES (COALESCE((SELECT MAX(version) FROM schema_migrations), 0) + 1, $1)";
    client
        .execute(insert_sql, &[&checksum])
        .await
        .map_err(|e| migration_err(e, insert_sql))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex("x").len(), 64);
    }

    #[test]
    fn lock_key_is_fixed() {
        // The key is part of the cross-process protocol; changing it would
        // let two versions migrate concurrently.
        assert_eq!(MIGRATION_LOCK_KEY, 0x70_67_6c_61_79_65_72);
    }
}
