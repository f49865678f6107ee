//! Connection configuration and pool construction.
//!
//! [`Config`] collects connection parameters, pool tuning, retry/breaker
//! settings, and observability sinks, then [`Config::connect`] builds the
//! deadpool-backed primary (and optional read-replica) pool and hands back a
//! [`Db`](crate::Db) facade.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres::config::SslMode;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::cache::QueryCache;
use crate::client::Db;
use crate::envelope::{ContextFields, Envelope};
use crate::error::{DbError, DbResult};
use crate::hooks::AuditHook;
use crate::metrics::{MetricsSink, NoopMetrics};

/// Query logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogMode {
    /// Nothing is logged.
    Silent,
    /// Only failures.
    Error,
    /// Every query, as structured debug events.
    Info,
    /// Every query, plus per-attempt detail.
    Debug,
}

/// Database configuration.
///
/// # Example
/// ```ignore
/// let db = Config::new()
///     .host("db.internal")
///     .database("app")
///     .username("app")
///     .password(secret)
///     .retry(3, Duration::from_millis(100))
///     .circuit_breaker(true)
///     .connect()?;
/// ```
pub struct Config {
    conn_string: Option<String>,
    host: String,
    port: u16,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    ssl_mode: String,
    application_name: Option<String>,
    connect_timeout: Option<Duration>,
    max_connections: usize,
    min_connections: usize,
    max_conn_lifetime: Option<Duration>,
    max_conn_idle_time: Option<Duration>,
    health_check_period: Option<Duration>,
    statement_cache_capacity: usize,
    read_only_conn_string: Option<String>,
    retry_attempts: u32,
    retry_backoff: Duration,
    circuit_breaker_enabled: bool,
    breaker: BreakerConfig,
    log_mode: LogMode,
    log_parameter_masking: bool,
    slow_query_threshold: Option<Duration>,
    query_timeout: Option<Duration>,
    context_fields: Option<ContextFields>,
    metrics: Arc<dyn MetricsSink>,
    cache: Option<Arc<dyn QueryCache>>,
    audit: Option<Arc<dyn AuditHook>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conn_string: None,
            host: "localhost".to_string(),
            port: 5432,
            database: None,
            username: None,
            password: None,
            ssl_mode: "disable".to_string(),
            application_name: None,
            connect_timeout: None,
            max_connections: 0,
            min_connections: 0,
            max_conn_lifetime: None,
            max_conn_idle_time: None,
            health_check_period: None,
            statement_cache_capacity: 0,
            read_only_conn_string: None,
            retry_attempts: 0,
            retry_backoff: Duration::from_millis(100),
            circuit_breaker_enabled: false,
            breaker: BreakerConfig::default(),
            log_mode: LogMode::Error,
            log_parameter_masking: false,
            slow_query_threshold: None,
            query_timeout: None,
            context_fields: None,
            metrics: Arc::new(NoopMetrics),
            cache: None,
            audit: None,
        }
    }
}

impl Config {
    /// Start from defaults (`localhost:5432`, sslmode `disable`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Full primary DSN (`postgres://…` or key=value form). Overrides the
    /// individual connection fields.
    pub fn conn_string(mut self, dsn: impl Into<String>) -> Self {
        self.conn_string = Some(dsn.into());
        self
    }

    /// Server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Database name.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// User name.
    pub fn username(mut self, name: impl Into<String>) -> Self {
        self.username = Some(name.into());
        self
    }

    /// Password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// SSL mode: `disable`, `prefer`, or `require`.
    pub fn ssl_mode(mut self, mode: impl Into<String>) -> Self {
        self.ssl_mode = mode.into();
        self
    }

    /// `application_name` reported to the server.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Connection establishment / pool wait timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Pool size cap. Zero keeps the pool default.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Minimum held connections. The deadpool backend grows on demand and
    /// does not pre-warm; a non-zero value is recorded and logged.
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Maximum connection lifetime. Not enforced by the deadpool backend;
    /// a non-zero value is recorded and logged.
    pub fn max_conn_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_conn_lifetime = Some(lifetime);
        self
    }

    /// Maximum connection idle time. Not enforced by the deadpool backend;
    /// a non-zero value is recorded and logged.
    pub fn max_conn_idle_time(mut self, idle: Duration) -> Self {
        self.max_conn_idle_time = Some(idle);
        self
    }

    /// Health-check cadence, applied as the pool's recycle-check timeout.
    pub fn health_check_period(mut self, period: Duration) -> Self {
        self.health_check_period = Some(period);
        self
    }

    /// Per-connection prepared-statement cache size. Zero disables caching.
    ///
    /// Each connection's cache is flushed when it grows past the capacity,
    /// and statements invalidated by a schema change (stale cached plans)
    /// are dropped and re-prepared once.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Full DSN for a read-replica pool; enables automatic read routing.
    pub fn read_only_conn_string(mut self, dsn: impl Into<String>) -> Self {
        self.read_only_conn_string = Some(dsn.into());
        self
    }

    /// Envelope retry: total attempts and fixed backoff between them.
    /// Zero attempts disables retrying.
    pub fn retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Enable or disable the circuit breaker.
    pub fn circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker_enabled = enabled;
        self
    }

    /// Consecutive failures that trip the breaker (default 5).
    pub fn circuit_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker.failure_threshold = threshold;
        self
    }

    /// Open duration before trial calls are admitted (default 30s).
    pub fn circuit_open_timeout(mut self, timeout: Duration) -> Self {
        self.breaker.open_timeout = timeout;
        self
    }

    /// Concurrent half-open trial calls (default 1).
    pub fn circuit_half_open_max_calls(mut self, max: usize) -> Self {
        self.breaker.half_open_max_in_flight = max;
        self
    }

    /// Logging verbosity.
    pub fn log_mode(mut self, mode: LogMode) -> Self {
        self.log_mode = mode;
        self
    }

    /// Mask parameters in logs. The inlined argument field is omitted
    /// entirely when enabled; error values keep the real arguments.
    pub fn log_parameter_masking(mut self, enabled: bool) -> Self {
        self.log_parameter_masking = enabled;
        self
    }

    /// Durations above this threshold emit `slow_query` / `slow_exec`
    /// warnings.
    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    /// Per-operation deadline; expiry is classified as a `Transaction`
    /// error with the cause preserved.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Correlation-field extractor attached to every query log event.
    pub fn log_context_fields(
        mut self,
        extractor: impl Fn() -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.context_fields = Some(Arc::new(extractor));
        self
    }

    /// Metrics sink.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Read-through query cache.
    pub fn cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Audit hook for mutating repository operations.
    pub fn audit_hook(mut self, hook: Arc<dyn AuditHook>) -> Self {
        self.audit = Some(hook);
        self
    }

    fn pg_config(&self) -> DbResult<tokio_postgres::Config> {
        if let Some(dsn) = &self.conn_string {
            return dsn
                .parse()
                .map_err(|e: tokio_postgres::Error| DbError::connection(e.to_string()));
        }

        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host);
        pg.port(self.port);
        if let Some(database) = &self.database {
            pg.dbname(database);
        }
        if let Some(username) = &self.username {
            pg.user(username);
        }
        if let Some(password) = &self.password {
            pg.password(password);
        }
        if let Some(name) = &self.application_name {
            pg.application_name(name);
        }
        if let Some(timeout) = self.connect_timeout {
            pg.connect_timeout(timeout);
        }
        pg.ssl_mode(match self.ssl_mode.to_ascii_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "prefer" => SslMode::Prefer,
            "require" => SslMode::Require,
            other => {
                return Err(DbError::validation(format!("unknown sslMode '{other}'")));
            }
        });
        Ok(pg)
    }

    fn build_pool(&self, pg: tokio_postgres::Config) -> DbResult<Pool> {
        let manager = Manager::from_config(
            pg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let mut builder = Pool::builder(manager).runtime(Runtime::Tokio1);
        if self.max_connections > 0 {
            builder = builder.max_size(self.max_connections);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder
                .wait_timeout(Some(timeout))
                .create_timeout(Some(timeout));
        }
        if let Some(period) = self.health_check_period {
            builder = builder.recycle_timeout(Some(period));
        }
        if self.min_connections > 0
            || self.max_conn_lifetime.is_some()
            || self.max_conn_idle_time.is_some()
        {
            tracing::debug!(
                target: "pglayer::pool",
                min_connections = self.min_connections,
                max_conn_lifetime = ?self.max_conn_lifetime,
                max_conn_idle_time = ?self.max_conn_idle_time,
                "pool tuning recorded; not enforced by the deadpool backend"
            );
        }
        builder
            .build()
            .map_err(|e| DbError::connection(e.to_string()))
    }

    /// Build the pools and the execution envelope.
    pub fn connect(self) -> DbResult<Db> {
        let primary = self.build_pool(self.pg_config()?)?;

        let read = match &self.read_only_conn_string {
            Some(dsn) => {
                let pg: tokio_postgres::Config = dsn
                    .parse()
                    .map_err(|e: tokio_postgres::Error| DbError::connection(e.to_string()))?;
                Some(self.build_pool(pg)?)
            }
            None => None,
        };

        let breaker = if self.circuit_breaker_enabled {
            let metrics = self.metrics.clone();
            Some(Arc::new(
                CircuitBreaker::new(self.breaker.clone())
                    .with_transition_hook(move |phase| metrics.breaker_state(phase)),
            ))
        } else {
            None
        };

        Ok(Db::new(Arc::new(Envelope {
            primary,
            read,
            breaker,
            retry_attempts: self.retry_attempts,
            retry_backoff: self.retry_backoff,
            log_mode: self.log_mode,
            mask_parameters: self.log_parameter_masking,
            slow_query_threshold: self.slow_query_threshold,
            query_timeout: self.query_timeout,
            statement_cache_capacity: self.statement_cache_capacity,
            metrics: self.metrics,
            cache: self.cache,
            audit: self.audit,
            context_fields: self.context_fields,
        })))
    }
}
