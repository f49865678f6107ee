//! Prepared-statement cache management.
//!
//! Statements are prepared per connection through the pool's
//! `prepare_cached`; this module adds the two pieces the pool does not
//! provide: a capacity bound on each connection's cache, and detection of
//! invalidated plans so a live schema change (the migrator's
//! `ALTER COLUMN ... TYPE` statements run against the same database) does
//! not leave long-lived pooled connections permanently erroring on a stale
//! cached plan. Callers drop the stale entry and re-prepare once.

/// Whether a SQLSTATE identifies a cached statement the connection should
/// drop and re-prepare.
pub(crate) fn is_stale_plan_code(code: &str, message: &str) -> bool {
    match code {
        // "cached plan must not change result type", raised after a schema
        // change alters the shape of a prepared statement's result.
        "0A000" => message
            .to_ascii_lowercase()
            .contains("cached plan must not change result type"),
        // invalid_sql_statement_name: the connection no longer knows the
        // prepared statement.
        "26000" => true,
        _ => false,
    }
}

/// Classify a raw driver error as a stale-cached-statement failure.
pub(crate) fn is_stale_statement_error(err: &tokio_postgres::Error) -> bool {
    let Some(db_err) = err.as_db_error() else {
        return false;
    };
    is_stale_plan_code(db_err.code().code(), db_err.message())
}

/// Bound the connection's statement cache.
///
/// The pool's per-connection cache keeps no access order to trim, so the
/// bound is enforced by a full flush; hot statements repopulate on their
/// next use.
pub(crate) fn enforce_capacity(client: &deadpool_postgres::Client, capacity: usize) {
    if capacity > 0 && client.statement_cache.size() > capacity {
        client.statement_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_plan_requires_the_known_message() {
        assert!(is_stale_plan_code(
            "0A000",
            "cached plan must not change result type"
        ));
        assert!(is_stale_plan_code(
            "0A000",
            "ERROR: Cached Plan Must Not Change Result Type"
        ));
        assert!(!is_stale_plan_code("0A000", "feature not supported"));
    }

    #[test]
    fn lost_statement_name_is_stale() {
        assert!(is_stale_plan_code("26000", "prepared statement \"s1\" does not exist"));
    }

    #[test]
    fn other_codes_are_not_stale() {
        assert!(!is_stale_plan_code("23505", "duplicate key value"));
        assert!(!is_stale_plan_code("42P01", "relation does not exist"));
    }
}
