//! Code-based migrations.
//!
//! A [`MigrationRegistry`] maps versions to async up/down callbacks that run
//! inside the migration transaction, so they can use the transaction's
//! builders and repositories as well as raw SQL.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_core::future::BoxFuture;

use super::{Migrator, applied_versions, delete_version, record_version};
use crate::error::{DbError, DbResult};
use crate::txn::DbTransaction;

/// An up or down migration step running inside the migration transaction.
pub type CodeMigrationFn =
    Arc<dyn for<'a> Fn(&'a DbTransaction) -> BoxFuture<'a, DbResult<()>> + Send + Sync>;

struct CodeMigration {
    description: String,
    up: CodeMigrationFn,
    down: Option<CodeMigrationFn>,
}

/// Version-ordered registry of code migrations.
///
/// # Example
/// ```ignore
/// let registry = MigrationRegistry::new()
///     .register(3, "backfill emails", |tx| {
///         Box::pin(async move {
///             tx.raw("UPDATE users SET email = lower(email)", vec![])
///                 .exec()
///                 .await?;
///             Ok(())
///         })
///     });
/// db.migrator().migrate_up_code(&registry).await?;
/// ```
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<i64, CodeMigration>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a forward-only migration.
    pub fn register<F>(mut self, version: i64, description: &str, up: F) -> Self
    where
        F: for<'a> Fn(&'a DbTransaction) -> BoxFuture<'a, DbResult<()>> + Send + Sync + 'static,
    {
        self.migrations.insert(
            version,
            CodeMigration {
                description: description.to_string(),
                up: Arc::new(up),
                down: None,
            },
        );
        self
    }

    /// Register a migration with a rollback.
    pub fn register_reversible<F, G>(
        mut self,
        version: i64,
        description: &str,
        up: F,
        down: G,
    ) -> Self
    where
        F: for<'a> Fn(&'a DbTransaction) -> BoxFuture<'a, DbResult<()>> + Send + Sync + 'static,
        G: for<'a> Fn(&'a DbTransaction) -> BoxFuture<'a, DbResult<()>> + Send + Sync + 'static,
    {
        self.migrations.insert(
            version,
            CodeMigration {
                description: description.to_string(),
                up: Arc::new(up),
                down: Some(Arc::new(down)),
            },
        );
        self
    }

    /// Registered versions, ascending.
    pub fn versions(&self) -> Vec<i64> {
        self.migrations.keys().copied().collect()
    }
}

fn code_checksum(version: i64, description: &str) -> String {
    format!("code:{version}:{description}")
}

impl Migrator {
    /// Apply unapplied registered migrations ascending, in one transaction
    /// under the advisory lock. Returns the applied versions.
    pub async fn migrate_up_code(&self, registry: &MigrationRegistry) -> DbResult<Vec<i64>> {
        let tx = self.begin().await?;
        let applied = applied_versions(&tx).await?;

        let mut done = Vec::new();
        for (version, migration) in &registry.migrations {
            if applied.contains(version) {
                continue;
            }
            (migration.up)(&tx).await?;
            record_version(&tx, *version, &code_checksum(*version, &migration.description))
                .await?;
            done.push(*version);
        }

        tx.commit().await?;
        Ok(done)
    }

    /// Roll back up to `steps` applied registered migrations, descending.
    ///
    /// Every rolled-back version must have a registered `down`.
    pub async fn migrate_down_code(
        &self,
        registry: &MigrationRegistry,
        steps: usize,
    ) -> DbResult<Vec<i64>> {
        if steps == 0 {
            return Ok(Vec::new());
        }
        let tx = self.begin().await?;

        let mut applied = applied_versions(&tx).await?;
        applied.retain(|version| registry.migrations.contains_key(version));
        applied.reverse();

        let mut done = Vec::new();
        for version in applied.into_iter().take(steps) {
            let migration = &registry.migrations[&version];
            let down = migration.down.as_ref().ok_or_else(|| {
                DbError::migration(format!(
                    "version {version} ({}) has no registered down migration",
                    migration.description
                ))
            })?;
            down(&tx).await?;
            delete_version(&tx, version).await?;
            done.push(version);
        }

        tx.commit().await?;
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_tx: &DbTransaction) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn registry_orders_versions() {
        let registry = MigrationRegistry::new()
            .register(5, "later", noop)
            .register(1, "first", noop);
        assert_eq!(registry.versions(), vec![1, 5]);
    }

    #[test]
    fn checksum_embeds_version_and_description() {
        assert_eq!(code_checksum(7, "add index"), "code:7:add index");
    }
}
