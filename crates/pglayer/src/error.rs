//! Error taxonomy for pglayer.
//!
//! Every driver error funnels through [`map_db_error`] before it reaches a
//! caller, so downstream code can branch on [`ErrorCode`] instead of raw
//! SQLSTATE strings. Errors carry the originating query and a rendered
//! argument list for diagnostics; the driver error stays reachable through
//! `std::error::Error::source`.

use std::fmt;

use thiserror::Error;

/// Result type alias for pglayer operations.
pub type DbResult<T> = Result<T, DbError>;

/// Stable classification of a database-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Connection-level failure (pool exhaustion, network, circuit open).
    Connection,
    /// Zero rows where one was required. Synthesized, never driver-produced.
    NotFound,
    /// Unique constraint violation (SQLSTATE 23505).
    Duplicate,
    /// Other integrity constraint violations.
    Constraint,
    /// Serialization failures, deadlocks, lock timeouts, cancellation,
    /// and optimistic-lock conflicts.
    Transaction,
    /// Schema migration failure.
    Migration,
    /// Invalid input, malformed SQL, or misuse of the API.
    Validation,
    /// Reference to a column that does not exist (SQLSTATE 42703).
    InvalidColumn,
    /// Reference to a function that does not exist (SQLSTATE 42883).
    InvalidFunction,
    /// Text representation could not be cast (SQLSTATE 22P02).
    InvalidCast,
    /// Value too long for the column type (SQLSTATE 22001).
    StringTooLong,
}

impl ErrorCode {
    /// Stable snake_case name, used for metrics counters and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Connection => "connection",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Duplicate => "duplicate",
            ErrorCode::Constraint => "constraint",
            ErrorCode::Transaction => "transaction",
            ErrorCode::Migration => "migration",
            ErrorCode::Validation => "validation",
            ErrorCode::InvalidColumn => "invalid_column",
            ErrorCode::InvalidFunction => "invalid_function",
            ErrorCode::InvalidCast => "invalid_cast",
            ErrorCode::StringTooLong => "string_too_long",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database-layer error: classification plus diagnostic context.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct DbError {
    code: ErrorCode,
    message: String,
    query: Option<String>,
    args: Vec<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DbError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            query: None,
            args: Vec::new(),
            source: None,
        }
    }

    /// Attach the originating query text and rendered arguments.
    pub fn with_query(mut self, query: impl Into<String>, args: Vec<String>) -> Self {
        self.query = Some(query.into());
        self.args = args;
        self
    }

    /// Attach an underlying error for `source()` chains.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Connection, message)
    }

    /// Create a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Migration, message)
    }

    /// Create a transaction-class error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transaction, message)
    }

    /// Missing `:name` binding in a named-parameter template.
    pub fn missing_named_param(name: &str) -> Self {
        Self::validation(format!("missing named parameter :{name}"))
    }

    /// A sequence binding referenced more than once in a named template.
    pub fn repeated_sequence_param(name: &str) -> Self {
        Self::validation(format!("sequence parameter :{name} used more than once"))
    }

    /// Zero rows matched an optimistic-locking update.
    pub fn optimistic_lock_conflict() -> Self {
        Self::transaction("optimistic lock conflict")
    }

    /// The error classification.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The originating query text, when known.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Rendered argument list of the originating query.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    /// Check if this is a unique violation.
    pub fn is_duplicate(&self) -> bool {
        self.code == ErrorCode::Duplicate
    }

    /// Check if this is a validation error.
    pub fn is_validation(&self) -> bool {
        self.code == ErrorCode::Validation
    }

    /// Check if this is a transaction-class error (serialization,
    /// deadlock, cancellation, optimistic-lock conflict).
    pub fn is_transaction(&self) -> bool {
        self.code == ErrorCode::Transaction
    }

    /// Check if this is a connection-class error. Connection errors
    /// (including circuit-open) are safe to retry.
    pub fn is_connection(&self) -> bool {
        self.code == ErrorCode::Connection
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::connection(err.to_string()).with_source(err)
    }
}

/// Classify a SQLSTATE code into the error taxonomy.
fn classify_sqlstate(code: &str) -> ErrorCode {
    match code {
        "23505" => ErrorCode::Duplicate,
        "23503" | "23514" | "23502" | "23513" => ErrorCode::Constraint,
        "40001" | "40P01" | "55P03" | "57014" => ErrorCode::Transaction,
        "53300" => ErrorCode::Connection,
        "42703" => ErrorCode::InvalidColumn,
        "42883" => ErrorCode::InvalidFunction,
        "22P02" => ErrorCode::InvalidCast,
        "22001" => ErrorCode::StringTooLong,
        c if c.starts_with("08") || c.starts_with("57P0") => ErrorCode::Connection,
        _ => ErrorCode::Validation,
    }
}

/// Map a driver error into the taxonomy, attaching query context.
///
/// Server errors are classified by SQLSTATE. Driver-side failures without a
/// server response (broken connection, unexpected EOF) become `Connection`.
pub fn map_db_error(
    err: tokio_postgres::Error,
    query: Option<&str>,
    args: Vec<String>,
) -> DbError {
    let (code, message) = match err.as_db_error() {
        Some(db_err) => (
            classify_sqlstate(db_err.code().code()),
            db_err.message().to_string(),
        ),
        None if err.is_closed() => (ErrorCode::Connection, err.to_string()),
        None => (ErrorCode::Connection, err.to_string()),
    };

    let mut mapped = DbError::new(code, message).with_source(err);
    if let Some(q) = query {
        mapped = mapped.with_query(q, args);
    }
    mapped
}

/// Classify a cancellation or deadline expiry as a `Transaction` error,
/// preserving the original cause.
pub fn map_cancellation(
    cause: impl std::error::Error + Send + Sync + 'static,
    query: Option<&str>,
) -> DbError {
    let mut mapped =
        DbError::transaction(format!("operation canceled: {cause}")).with_source(cause);
    if let Some(q) = query {
        mapped = mapped.with_query(q, Vec::new());
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_duplicate() {
        assert_eq!(classify_sqlstate("23505"), ErrorCode::Duplicate);
    }

    #[test]
    fn sqlstate_constraint_family() {
        for code in ["23503", "23514", "23502", "23513"] {
            assert_eq!(classify_sqlstate(code), ErrorCode::Constraint, "{code}");
        }
    }

    #[test]
    fn sqlstate_transaction_family() {
        for code in ["40001", "40P01", "55P03", "57014"] {
            assert_eq!(classify_sqlstate(code), ErrorCode::Transaction, "{code}");
        }
    }

    #[test]
    fn sqlstate_connection_family() {
        for code in ["08000", "08006", "08P01", "53300", "57P01", "57P02", "57P03"] {
            assert_eq!(classify_sqlstate(code), ErrorCode::Connection, "{code}");
        }
    }

    #[test]
    fn sqlstate_specific_codes() {
        assert_eq!(classify_sqlstate("42703"), ErrorCode::InvalidColumn);
        assert_eq!(classify_sqlstate("42883"), ErrorCode::InvalidFunction);
        assert_eq!(classify_sqlstate("22P02"), ErrorCode::InvalidCast);
        assert_eq!(classify_sqlstate("22001"), ErrorCode::StringTooLong);
    }

    #[test]
    fn sqlstate_unknown_is_validation() {
        assert_eq!(classify_sqlstate("42601"), ErrorCode::Validation);
        assert_eq!(classify_sqlstate("42P01"), ErrorCode::Validation);
        assert_eq!(classify_sqlstate("XX000"), ErrorCode::Validation);
    }

    #[test]
    fn error_carries_query_context() {
        let err = DbError::validation("bad input")
            .with_query("SELECT $1", vec!["42".to_string()]);
        assert_eq!(err.code(), ErrorCode::Validation);
        assert_eq!(err.query(), Some("SELECT $1"));
        assert_eq!(err.args(), ["42".to_string()]);
        assert_eq!(err.to_string(), "validation: bad input");
    }

    #[test]
    fn optimistic_lock_conflict_is_transaction() {
        let err = DbError::optimistic_lock_conflict();
        assert!(err.is_transaction());
        assert_eq!(err.message(), "optimistic lock conflict");
    }
}
