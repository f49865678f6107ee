//! Terminal operations: materialize and execute through the envelope.

use super::{Mode, QueryBuilder};
use crate::envelope::Route;
use crate::error::{DbError, DbResult};
use crate::row::{FromRow, JsonMap, rows_to_maps};

impl QueryBuilder<'_> {
    /// Execute a SELECT and decode every row into a map keyed by server
    /// field names. Consults the read-through cache when a cache key is set.
    pub async fn fetch_maps(self) -> DbResult<Vec<JsonMap>> {
        let route = self.route;
        let force_debug = self.force_debug;
        let cache_key = self.cache_key.clone();
        let source = self.source.clone_ref();
        let envelope = source.envelope();

        if let Some((key, _)) = &cache_key
            && let Some(hit) = envelope.cache_get_maps(key).await
        {
            return Ok(hit);
        }

        let built = self.build()?;
        let rows = envelope
            .query(&source, route, &built.sql, &built.args, force_debug)
            .await?;
        let maps = rows_to_maps(&rows)?;

        if let Some((key, ttl)) = &cache_key {
            envelope.cache_set_maps(key, *ttl, &maps).await;
        }
        Ok(maps)
    }

    /// Execute a SELECT and decode every row into `T`.
    pub async fn fetch_as<T: FromRow>(self) -> DbResult<Vec<T>> {
        let route = self.route;
        let force_debug = self.force_debug;
        let source = self.source.clone_ref();
        let built = self.build()?;
        let rows = source
            .envelope()
            .query(&source, route, &built.sql, &built.args, force_debug)
            .await?;
        rows.iter().map(T::from_row).collect()
    }

    /// Fetch the first row as a map; `NotFound` when the result is empty.
    pub async fn first_map(mut self) -> DbResult<JsonMap> {
        self.limit = Some(1);
        self.fetch_maps()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("no rows returned"))
    }

    /// Fetch the first row decoded into `T`; `NotFound` when empty.
    pub async fn first_as<T: FromRow>(mut self) -> DbResult<T> {
        self.limit = Some(1);
        self.fetch_as::<T>()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("no rows returned"))
    }

    /// Fetch the last row under the current ordering, by flipping each ORDER
    /// BY entry's trailing direction token and taking the first row.
    ///
    /// Requires an explicit `order_by`.
    pub async fn last_as<T: FromRow>(mut self) -> DbResult<T> {
        if self.order_by.is_empty() {
            return Err(DbError::validation("last() requires an explicit order_by"));
        }
        self.order_by = self.order_by.iter().map(|e| flip_direction(e)).collect();
        self.first_as::<T>().await
    }

    /// Execute a DML statement, returning the affected row count.
    pub async fn exec(self) -> DbResult<u64> {
        self.execute_built().await
    }

    /// Delete matching rows: soft by default on soft-delete-aware models,
    /// hard after [`hard_delete`](Self::hard_delete). Returns the affected
    /// row count.
    pub async fn delete(mut self) -> DbResult<u64> {
        self.mode = Mode::Delete;
        self.execute_built().await
    }

    /// Execute an INSERT with RETURNING, decoding returned rows into maps.
    pub async fn exec_insert(self) -> DbResult<Vec<JsonMap>> {
        if self.returning.is_empty() {
            return Err(DbError::validation("exec_insert requires returning columns"));
        }
        self.execute_returning().await
    }

    /// Execute an UPDATE with RETURNING, decoding returned rows into maps.
    pub async fn exec_update(self) -> DbResult<Vec<JsonMap>> {
        if self.returning.is_empty() {
            return Err(DbError::validation("exec_update requires returning columns"));
        }
        self.execute_returning().await
    }

    async fn execute_returning(self) -> DbResult<Vec<JsonMap>> {
        let force_debug = self.force_debug;
        let invalidate = self.invalidate.clone();
        let source = self.source.clone_ref();
        let built = self.build()?;
        let rows = source
            .envelope()
            .query(&source, Route::Primary, &built.sql, &built.args, force_debug)
            .await?;
        let maps = rows_to_maps(&rows)?;
        source.envelope().cache_invalidate(&invalidate).await;
        Ok(maps)
    }

    pub(crate) async fn execute_built(self) -> DbResult<u64> {
        let force_debug = self.force_debug;
        let invalidate = self.invalidate.clone();
        let source = self.source.clone_ref();
        let built = self.build()?;
        let affected = source
            .envelope()
            .execute(&source, &built.sql, &built.args, force_debug)
            .await?;
        source.envelope().cache_invalidate(&invalidate).await;
        Ok(affected)
    }
}

fn flip_direction(expr: &str) -> String {
    let trimmed = expr.trim_end();
    if let Some(prefix) = strip_suffix_ignore_case(trimmed, "DESC") {
        format!("{prefix}ASC")
    } else if let Some(prefix) = strip_suffix_ignore_case(trimmed, "ASC") {
        format!("{prefix}DESC")
    } else {
        format!("{trimmed} DESC")
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() < suffix.len() {
        return None;
    }
    let (prefix, tail) = s.split_at(s.len() - suffix.len());
    if tail.eq_ignore_ascii_case(suffix) && prefix.ends_with(char::is_whitespace) {
        Some(prefix)
    } else {
        None
    }
}

#[cfg(test)]
mod direction_tests {
    use super::flip_direction;

    #[test]
    fn flips_trailing_token() {
        assert_eq!(flip_direction("id ASC"), "id DESC");
        assert_eq!(flip_direction("id DESC"), "id ASC");
        assert_eq!(flip_direction("created_at desc"), "created_at ASC");
    }

    #[test]
    fn bare_expression_becomes_desc() {
        assert_eq!(flip_direction("id"), "id DESC");
    }
}
