//! The execution envelope.
//!
//! Every statement issued by builders and repositories passes through here:
//! circuit-breaker gate, retry loop with cancellable backoff, read/primary
//! routing, SQLSTATE error mapping, structured query logging, metrics, and
//! the read-through cache helpers.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::breaker::CircuitBreaker;
use crate::cache::QueryCache;
use crate::config::LogMode;
use crate::error::{DbError, DbResult, map_cancellation, map_db_error};
use crate::hooks::AuditHook;
use crate::metrics::MetricsSink;
use crate::row::JsonMap;
use crate::stmt_cache::{enforce_capacity, is_stale_statement_error};
use crate::txn::DbTransaction;
use crate::value::{Arg, params_ref, render_args};

/// Correlation-field extractor attached to query log events.
pub type ContextFields = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// Where a read should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Reads steer to the read pool when one is configured.
    Auto,
    /// Force the primary.
    Primary,
    /// Force the read pool (falls back to primary when none is configured).
    Read,
}

/// The executor a builder is bound to.
pub(crate) enum Source<'a> {
    /// Pooled execution with routing.
    Db(Arc<Envelope>),
    /// A live transaction; routing does not apply.
    Tx(&'a DbTransaction),
}

impl<'a> std::fmt::Debug for Source<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Db(_) => f.write_str("Source::Db"),
            Source::Tx(_) => f.write_str("Source::Tx"),
        }
    }
}

impl<'a> Source<'a> {
    pub(crate) fn envelope(&self) -> &Envelope {
        match self {
            Source::Db(envelope) => envelope,
            Source::Tx(tx) => tx.envelope(),
        }
    }

    /// A second handle to the same executor; the `Db` variant bumps the
    /// envelope refcount, the `Tx` variant copies the borrow.
    pub(crate) fn clone_ref(&self) -> Source<'a> {
        match self {
            Source::Db(envelope) => Source::Db(envelope.clone()),
            Source::Tx(tx) => Source::Tx(tx),
        }
    }
}

enum RunOutcome {
    Rows(Vec<Row>),
    Affected(u64),
}

pub(crate) struct Envelope {
    pub(crate) primary: Pool,
    pub(crate) read: Option<Pool>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) log_mode: LogMode,
    pub(crate) mask_parameters: bool,
    pub(crate) slow_query_threshold: Option<Duration>,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) statement_cache_capacity: usize,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) cache: Option<Arc<dyn QueryCache>>,
    pub(crate) audit: Option<Arc<dyn AuditHook>>,
    pub(crate) context_fields: Option<ContextFields>,
}

impl Envelope {
    /// Acquire a pooled client for the given route.
    pub(crate) async fn acquire(&self, route: Route) -> DbResult<deadpool_postgres::Client> {
        let pool = match (route, &self.read) {
            (Route::Primary, _) | (_, None) => &self.primary,
            (Route::Auto | Route::Read, Some(read)) => read,
        };
        Ok(pool.get().await?)
    }

    /// Run a row-returning statement through the full envelope.
    pub(crate) async fn query(
        &self,
        source: &Source<'_>,
        route: Route,
        sql: &str,
        args: &[Arg],
        force_debug: bool,
    ) -> DbResult<Vec<Row>> {
        match self
            .run(source, route, sql, args, force_debug, false)
            .await?
        {
            RunOutcome::Rows(rows) => Ok(rows),
            RunOutcome::Affected(_) => unreachable!("query ran as execute"),
        }
    }

    /// Run a mutating statement through the full envelope. Always primary.
    pub(crate) async fn execute(
        &self,
        source: &Source<'_>,
        sql: &str,
        args: &[Arg],
        force_debug: bool,
    ) -> DbResult<u64> {
        match self
            .run(source, Route::Primary, sql, args, force_debug, true)
            .await?
        {
            RunOutcome::Affected(n) => Ok(n),
            RunOutcome::Rows(_) => unreachable!("execute ran as query"),
        }
    }

    async fn run(
        &self,
        source: &Source<'_>,
        route: Route,
        sql: &str,
        args: &[Arg],
        force_debug: bool,
        is_exec: bool,
    ) -> DbResult<RunOutcome> {
        let attempts = self.retry_attempts.max(1);
        let mut last_err: Option<DbError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                // Cancellable: dropping the caller's future abandons the wait.
                tokio::time::sleep(self.retry_backoff).await;
            }
            match self
                .attempt(source, route, sql, args, force_debug, is_exec)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    /// Report one finished (or rejected) attempt to metrics and the log.
    fn observe(
        &self,
        is_exec: bool,
        sql: &str,
        args: &[Arg],
        duration: Duration,
        error: Option<&DbError>,
        force_debug: bool,
    ) {
        let operation = if is_exec { "exec" } else { "query" };
        self.metrics.observe_query(operation, duration);
        if let Some(err) = error {
            self.metrics.incr_error(err.code().as_str());
        }
        self.log(operation, sql, args, duration, error, force_debug);
    }

    async fn attempt(
        &self,
        source: &Source<'_>,
        route: Route,
        sql: &str,
        args: &[Arg],
        force_debug: bool,
        is_exec: bool,
    ) -> DbResult<RunOutcome> {
        let started = std::time::Instant::now();

        // Breaker rejections are calls too: they report a duration, count
        // as errors, and emit a log record like any other attempt.
        let admission = match &self.breaker {
            Some(breaker) => match breaker.before() {
                Ok(admission) => Some(admission),
                Err(err) => {
                    self.observe(is_exec, sql, args, started.elapsed(), Some(&err), force_debug);
                    return Err(err);
                }
            },
            None => None,
        };

        let result = match self.query_timeout {
            Some(timeout) => {
                match tokio::time::timeout(
                    timeout,
                    self.attempt_raw(source, route, sql, args, is_exec),
                )
                .await
                {
                    Ok(result) => result,
                    Err(elapsed) => Err(map_cancellation(elapsed, Some(sql))),
                }
            }
            None => self.attempt_raw(source, route, sql, args, is_exec).await,
        };
        let duration = started.elapsed();

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) => breaker.on_success(),
                Err(_) => breaker.on_failure(),
            }
        }
        drop(admission);

        self.observe(is_exec, sql, args, duration, result.as_ref().err(), force_debug);
        result
    }

    async fn attempt_raw(
        &self,
        source: &Source<'_>,
        route: Route,
        sql: &str,
        args: &[Arg],
        is_exec: bool,
    ) -> DbResult<RunOutcome> {
        match source {
            Source::Db(_) => {
                let client = self.acquire(if is_exec { Route::Primary } else { route }).await?;
                self.run_on(&client, sql, args, is_exec).await
            }
            Source::Tx(tx) => self.run_on(tx.client(), sql, args, is_exec).await,
        }
    }

    async fn run_on(
        &self,
        client: &deadpool_postgres::Client,
        sql: &str,
        args: &[Arg],
        is_exec: bool,
    ) -> DbResult<RunOutcome> {
        let params = params_ref(args);
        let map_err = |e| map_db_error(e, Some(sql), render_args(args));

        if self.statement_cache_capacity > 0 {
            let statement = client.prepare_cached(sql).await.map_err(map_err)?;
            let outcome = match run_statement(client, &statement, &params, is_exec).await {
                Ok(outcome) => Ok(outcome),
                Err(err) if is_stale_statement_error(&err) => {
                    // A schema change (e.g. a live migration) invalidated
                    // the cached plan on this connection: drop the entry
                    // and prepare a fresh statement once.
                    let _ = client.statement_cache.remove(sql, &[]);
                    let statement = client.prepare_cached(sql).await.map_err(map_err)?;
                    run_statement(client, &statement, &params, is_exec)
                        .await
                        .map_err(map_err)
                }
                Err(err) => Err(map_err(err)),
            };
            enforce_capacity(client, self.statement_cache_capacity);
            return outcome;
        }

        if is_exec {
            client
                .execute(sql, &params)
                .await
                .map(RunOutcome::Affected)
                .map_err(map_err)
        } else {
            client
                .query(sql, &params)
                .await
                .map(RunOutcome::Rows)
                .map_err(map_err)
        }
    }

    fn log(
        &self,
        operation: &'static str,
        sql: &str,
        args: &[Arg],
        duration: Duration,
        error: Option<&DbError>,
        force_debug: bool,
    ) {
        if self.log_mode == LogMode::Silent && !force_debug {
            return;
        }

        let duration_ms = duration.as_millis() as u64;
        let context = self
            .context_fields
            .as_ref()
            .map(|extract| extract())
            .unwrap_or_default();

        if let Some(err) = error {
            if self.log_mode >= LogMode::Error || force_debug {
                tracing::error!(
                    target: "pglayer::sql",
                    operation,
                    sql,
                    duration_ms,
                    error = %err,
                    context = ?context,
                    "query failed"
                );
            }
            return;
        }

        let slow = self
            .slow_query_threshold
            .is_some_and(|threshold| duration >= threshold);
        if slow {
            let tag = if operation == "exec" { "slow_exec" } else { "slow_query" };
            if self.mask_parameters {
                tracing::warn!(
                    target: "pglayer::sql",
                    operation,
                    tag,
                    sql,
                    duration_ms,
                    context = ?context,
                    "slow statement"
                );
            } else {
                tracing::warn!(
                    target: "pglayer::sql",
                    operation,
                    tag,
                    sql,
                    args = ?render_args(args),
                    duration_ms,
                    context = ?context,
                    "slow statement"
                );
            }
            return;
        }

        if self.log_mode >= LogMode::Info || force_debug {
            if self.mask_parameters {
                tracing::debug!(
                    target: "pglayer::sql",
                    operation,
                    sql,
                    duration_ms,
                    context = ?context,
                    "query"
                );
            } else {
                tracing::debug!(
                    target: "pglayer::sql",
                    operation,
                    sql,
                    args = ?render_args(args),
                    duration_ms,
                    context = ?context,
                    "query"
                );
            }
        }
    }

    // ==================== Cache helpers ====================

    /// Read-through lookup for a map-destination SELECT. Cache failures are
    /// logged and treated as misses.
    pub(crate) async fn cache_get_maps(&self, key: &str) -> Option<Vec<JsonMap>> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_slice(&payload) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    tracing::warn!(target: "pglayer::cache", key, error = %err, "cache decode failed");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(target: "pglayer::cache", key, error = %err, "cache get failed");
                None
            }
        }
    }

    /// Store a map-destination result set.
    pub(crate) async fn cache_set_maps(&self, key: &str, ttl: Duration, maps: &[JsonMap]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        match serde_json::to_vec(maps) {
            Ok(payload) => {
                if let Err(err) = cache.set(key, payload, ttl).await {
                    tracing::warn!(target: "pglayer::cache", key, error = %err, "cache set failed");
                }
            }
            Err(err) => {
                tracing::warn!(target: "pglayer::cache", key, error = %err, "cache encode failed");
            }
        }
    }

    /// Drop invalidation keys after a successful mutation.
    pub(crate) async fn cache_invalidate(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(err) = cache.invalidate(keys).await {
            tracing::warn!(target: "pglayer::cache", error = %err, "cache invalidate failed");
        }
    }

    /// The configured audit hook, if any.
    pub(crate) fn audit(&self) -> Option<&Arc<dyn AuditHook>> {
        self.audit.as_ref()
    }
}

/// Execute a prepared statement, keeping the raw driver error so callers can
/// classify stale cached plans before mapping.
async fn run_statement(
    client: &deadpool_postgres::Client,
    statement: &tokio_postgres::Statement,
    params: &[&(dyn ToSql + Sync)],
    is_exec: bool,
) -> Result<RunOutcome, tokio_postgres::Error> {
    if is_exec {
        client
            .execute(statement, params)
            .await
            .map(RunOutcome::Affected)
    } else {
        client.query(statement, params).await.map(RunOutcome::Rows)
    }
}
