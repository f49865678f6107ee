//! Lifecycle hooks and audit entries.
//!
//! Hooks are capability probes: override the methods you care about and the
//! repository invokes them around the matching operation. A before-hook
//! error aborts the operation before any driver interaction; an after-hook
//! error surfaces to the caller after the statement ran.
//!
//! Entity-carrying operations (create, update, upsert) receive the entity;
//! id-scoped operations (delete, soft delete, restore) receive the id; bulk
//! operations (soft-delete-all, purge) take no arguments.

use std::future::Future;

use crate::descriptor::Record;
use crate::error::DbResult;
use crate::value::Arg;

/// Per-record lifecycle callbacks.
///
/// All methods default to no-ops; implement the trait (even empty) for every
/// record handled by a repository:
///
/// ```ignore
/// impl pglayer::Hooks for User {}
/// ```
pub trait Hooks: Record {
    /// Runs before INSERT.
    fn before_create(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs after a successful INSERT.
    fn after_create(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs before UPDATE (full or partial).
    fn before_update(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs after a successful UPDATE.
    fn after_update(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs before an upsert.
    fn before_upsert(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs after a successful upsert.
    fn after_upsert(&self) -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs before a hard DELETE of `id`.
    fn before_delete(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs after a successful hard DELETE of `id`.
    fn after_delete(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs before a soft delete of `id`.
    fn before_soft_delete(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs after a successful soft delete of `id`.
    fn after_soft_delete(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs before a restore of `id`.
    fn before_restore(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs after a successful restore of `id`.
    fn after_restore(id: &Arg) -> impl Future<Output = DbResult<()>> + Send {
        let _ = id;
        async { Ok(()) }
    }

    /// Runs before purging trashed rows.
    fn before_purge_trashed() -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs after a successful purge.
    fn after_purge_trashed() -> impl Future<Output = DbResult<()>> + Send {
        async { Ok(()) }
    }
}

/// A structured record of one mutating repository operation.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Operation name (`create`, `update`, `soft_delete`, …).
    pub action: String,
    /// Target table.
    pub table: String,
    /// Rendered entity id, when the operation targets one row.
    pub entity_id: Option<String>,
    /// Debug rendering of the entity, when one was supplied.
    pub entity: Option<String>,
    /// The executed SQL.
    pub query: String,
    /// Error message when the operation failed.
    pub error: Option<String>,
}

/// Receives audit entries after each mutating repository operation.
pub trait AuditHook: Send + Sync {
    /// Record one entry. Called after execution, on success and failure.
    fn record(&self, entry: AuditEntry);
}
