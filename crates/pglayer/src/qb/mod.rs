//! The fluent query builder.
//!
//! A [`QueryBuilder`] is a short-lived, single-use value: fluent methods
//! accumulate state, a terminal method (in `exec`) or [`build`](QueryBuilder::build)
//! consumes it. Builders bound to a model with a `deleted_at` column apply
//! soft-delete scoping automatically; positional `?` placeholders across all
//! conjuncts are numbered in one pass at materialization.

mod exec;
mod sqlgen;

#[cfg(test)]
mod tests;

use std::time::Duration;

use crate::cond::Cond;
use crate::descriptor::{Record, descriptor_for};
use crate::envelope::{Route, Source};
use crate::error::{DbError, DbResult};
use crate::ident::{quote_ident, quote_qualified};
use crate::placeholder::{NamedArgs, convert_named, convert_named_positional};
use crate::txn::DbTransaction;
use crate::value::Arg;

/// A materialized statement: numbered SQL plus its arguments.
#[derive(Debug)]
pub struct BuiltQuery {
    /// SQL with `$N` placeholders.
    pub sql: String,
    /// Arguments in placeholder order.
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
}

/// Soft-delete visibility scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Default,
    WithTrashed,
    OnlyTrashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeysetBound {
    After,
    Before,
}

#[derive(Debug)]
pub(crate) struct Keyset {
    pub(crate) column: String,
    pub(crate) value: Arg,
    pub(crate) bound: KeysetBound,
}

/// Fluent, single-use SQL construction bound to an executor.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    pub(crate) source: Source<'a>,
    pub(crate) table: Option<String>,
    pub(crate) projection: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) joins: Vec<String>,
    pub(crate) wheres: Vec<(String, Vec<Arg>)>,
    pub(crate) keyset: Vec<Keyset>,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: Option<(String, Vec<Arg>)>,
    pub(crate) order_by: Vec<String>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    pub(crate) for_update: bool,
    pub(crate) raw_sql: Option<(String, Vec<Arg>)>,
    pub(crate) mode: Mode,
    pub(crate) hard_delete: bool,
    pub(crate) insert_columns: Vec<String>,
    pub(crate) insert_rows: Vec<Vec<Arg>>,
    pub(crate) returning: Vec<String>,
    pub(crate) conflict_columns: Vec<String>,
    pub(crate) conflict_update: Option<(String, Vec<Arg>)>,
    pub(crate) set_clause: Option<(String, Vec<Arg>)>,
    pub(crate) cache_key: Option<(String, Duration)>,
    pub(crate) invalidate: Vec<String>,
    pub(crate) scope: Scope,
    pub(crate) soft_delete_model: bool,
    pub(crate) route: Route,
    pub(crate) force_debug: bool,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(source: Source<'a>) -> Self {
        Self {
            source,
            table: None,
            projection: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            keyset: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            for_update: false,
            raw_sql: None,
            mode: Mode::Select,
            hard_delete: false,
            insert_columns: Vec::new(),
            insert_rows: Vec::new(),
            returning: Vec::new(),
            conflict_columns: Vec::new(),
            conflict_update: None,
            set_clause: None,
            cache_key: None,
            invalidate: Vec::new(),
            scope: Scope::Default,
            soft_delete_model: false,
            route: Route::Auto,
            force_debug: false,
        }
    }

    pub(crate) fn for_tx(tx: &'a DbTransaction) -> Self {
        Self::new(Source::Tx(tx))
    }

    // ==================== Source & projection ====================

    /// Target a raw table expression (taken verbatim).
    pub fn table(mut self, name: &str) -> Self {
        self.table = Some(name.to_string());
        self
    }

    /// Target a table with identifier quoting applied.
    pub fn table_quoted(mut self, name: &str) -> Self {
        self.table = Some(quote_qualified(name));
        self
    }

    /// Bind to a record type: infers the (quoted) table name and enables
    /// soft-delete scoping when the type carries a `deleted_at` column.
    pub fn model<T: Record>(mut self) -> DbResult<Self> {
        let descriptor = descriptor_for::<T>()?;
        self.table = Some(quote_qualified(&descriptor.table));
        self.soft_delete_model = descriptor.soft_delete;
        Ok(self)
    }

    /// Append projection expressions verbatim. Empty projection selects `*`.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.projection
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Append projection columns with identifier quoting.
    pub fn select_quoted(mut self, columns: &[&str]) -> Self {
        self.projection
            .extend(columns.iter().map(|c| quote_qualified(c)));
        self
    }

    /// SELECT DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // ==================== Filters ====================

    /// Append a raw conjunct with `?` positional placeholders.
    pub fn filter(mut self, expr: &str, args: Vec<Arg>) -> Self {
        self.wheres.push((expr.to_string(), args));
        self
    }

    /// Append a conjunct with `:name` placeholders, converted to positional
    /// form before merging.
    pub fn filter_named(mut self, expr: &str, named: &NamedArgs) -> DbResult<Self> {
        let (expr, args) = convert_named_positional(expr, named)?;
        self.wheres.push((expr, args));
        Ok(self)
    }

    /// Append a pre-built [`Cond`] as a conjunct.
    pub fn filter_cond(mut self, cond: Cond) -> Self {
        let (expr, args) = cond.into_parts();
        self.wheres.push((expr, args));
        self
    }

    // ==================== Joins ====================

    /// `JOIN table ON on`, appended verbatim.
    pub fn join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!("JOIN {table} ON {on}"));
        self
    }

    /// `INNER JOIN table ON on`, appended verbatim.
    pub fn inner_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!("INNER JOIN {table} ON {on}"));
        self
    }

    /// `LEFT JOIN table ON on`, appended verbatim.
    pub fn left_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!("LEFT JOIN {table} ON {on}"));
        self
    }

    /// `RIGHT JOIN table ON on`, appended verbatim.
    pub fn right_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!("RIGHT JOIN {table} ON {on}"));
        self
    }

    /// `FULL JOIN table ON on`, appended verbatim.
    pub fn full_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!("FULL JOIN {table} ON {on}"));
        self
    }

    /// `CROSS JOIN table`, appended verbatim.
    pub fn cross_join(mut self, table: &str) -> Self {
        self.joins.push(format!("CROSS JOIN {table}"));
        self
    }

    // ==================== Ordering & paging ====================

    /// Append an ORDER BY expression (e.g. `"created_at DESC"`).
    pub fn order_by(mut self, expr: &str) -> Self {
        self.order_by.push(expr.to_string());
        self
    }

    /// GROUP BY expression, appended verbatim.
    pub fn group_by(mut self, expr: &str) -> Self {
        self.group_by.push(expr.to_string());
        self
    }

    /// HAVING clause with `?` placeholders.
    pub fn having(mut self, expr: &str, args: Vec<Arg>) -> Self {
        self.having = Some((expr.to_string(), args));
        self
    }

    /// LIMIT.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// OFFSET.
    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Keyset bound: rows strictly beyond `value` in the ordering direction
    /// (`>` when ascending, `<` when descending).
    pub fn after(mut self, column: &str, value: Arg) -> Self {
        self.keyset.push(Keyset {
            column: column.to_string(),
            value,
            bound: KeysetBound::After,
        });
        self
    }

    /// Keyset bound: rows strictly before `value` in the ordering direction.
    pub fn before(mut self, column: &str, value: Arg) -> Self {
        self.keyset.push(Keyset {
            column: column.to_string(),
            value,
            bound: KeysetBound::Before,
        });
        self
    }

    /// `FOR UPDATE` row locking.
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    // ==================== Soft-delete scoping ====================

    /// Include trashed rows.
    pub fn with_trashed(mut self) -> Self {
        self.scope = Scope::WithTrashed;
        self
    }

    /// Only trashed rows.
    pub fn only_trashed(mut self) -> Self {
        self.scope = Scope::OnlyTrashed;
        self
    }

    /// Alias of [`with_trashed`](Self::with_trashed).
    pub fn unscoped(self) -> Self {
        self.with_trashed()
    }

    // ==================== Writes ====================

    /// Switch to INSERT mode with the given (quoted) column list.
    pub fn insert(mut self, columns: &[&str]) -> Self {
        self.mode = Mode::Insert;
        self.insert_columns = columns.iter().map(|c| quote_qualified(c)).collect();
        self
    }

    /// Append one VALUES row.
    pub fn values(mut self, row: Vec<Arg>) -> Self {
        self.insert_rows.push(row);
        self
    }

    /// Append several VALUES rows.
    pub fn values_rows(mut self, rows: Vec<Vec<Arg>>) -> Self {
        self.insert_rows.extend(rows);
        self
    }

    /// RETURNING expressions, appended verbatim.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.returning.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// ON CONFLICT target columns (quoted). Without a following
    /// [`do_update_set`](Self::do_update_set), renders `DO NOTHING`.
    pub fn on_conflict(mut self, columns: &[&str]) -> Self {
        self.conflict_columns = columns.iter().map(|c| quote_qualified(c)).collect();
        self
    }

    /// ON CONFLICT … DO UPDATE SET expression with `?` placeholders,
    /// renumbered past the insert arguments at materialization.
    pub fn do_update_set(mut self, expr: &str, args: Vec<Arg>) -> Self {
        self.conflict_update = Some((expr.to_string(), args));
        self
    }

    /// Switch to UPDATE mode with a SET expression (`?` placeholders).
    pub fn set(mut self, expr: &str, args: Vec<Arg>) -> Self {
        self.mode = Mode::Update;
        self.set_clause = Some((expr.to_string(), args));
        self
    }

    /// Opt into hard `DELETE FROM` instead of the default soft delete for
    /// soft-delete-aware models.
    pub fn hard_delete(mut self) -> Self {
        self.hard_delete = true;
        self
    }

    /// INSERT columns and arguments derived from a record's descriptor.
    ///
    /// Skips ignored fields and fields holding their zero value with a
    /// declared column default (the server applies the default). Binds to
    /// the record's table when none was set.
    pub fn insert_struct<T: Record>(mut self, entity: &T) -> DbResult<Self> {
        let descriptor = descriptor_for::<T>()?;
        if self.table.is_none() {
            self.table = Some(quote_qualified(&descriptor.table));
            self.soft_delete_model = descriptor.soft_delete;
        }
        self.mode = Mode::Insert;
        self.insert_columns.clear();

        let mut row = Vec::new();
        for field in &descriptor.fields {
            if field.primary_key && field.auto_increment {
                continue;
            }
            if field.default.is_some() && entity.is_zero_field(&field.field) {
                continue;
            }
            let value = entity.arg(&field.field).ok_or_else(|| {
                DbError::validation(format!("field '{}' has no value accessor", field.field))
            })?;
            self.insert_columns.push(quote_ident(&field.column));
            row.push(value);
        }
        self.insert_rows.push(row);
        Ok(self)
    }

    /// UPDATE SET expression and PK filter derived from a record's
    /// descriptor. `on_update:now()` columns are set server-side.
    pub fn update_struct_by_pk<T: Record>(mut self, entity: &T, pk_column: &str) -> DbResult<Self> {
        let descriptor = descriptor_for::<T>()?;
        if self.table.is_none() {
            self.table = Some(quote_qualified(&descriptor.table));
            self.soft_delete_model = descriptor.soft_delete;
        }

        let pk = descriptor.field_by_column(pk_column).ok_or_else(|| {
            DbError::validation(format!(
                "table '{}' has no column '{pk_column}'",
                descriptor.table
            ))
        })?;
        let pk_value = entity.arg(&pk.field).ok_or_else(|| {
            DbError::validation(format!("field '{}' has no value accessor", pk.field))
        })?;

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for field in &descriptor.fields {
            if field.column == pk_column {
                continue;
            }
            if field.on_update_now {
                sets.push(format!("{} = NOW()", quote_ident(&field.column)));
                continue;
            }
            let value = entity.arg(&field.field).ok_or_else(|| {
                DbError::validation(format!("field '{}' has no value accessor", field.field))
            })?;
            sets.push(format!("{} = ?", quote_ident(&field.column)));
            args.push(value);
        }

        self.mode = Mode::Update;
        self.set_clause = Some((sets.join(", "), args));
        self.wheres
            .push((format!("{} = ?", quote_ident(pk_column)), vec![pk_value]));
        Ok(self)
    }

    // ==================== Raw ====================

    /// Treat `sql` as an opaque statement with pre-numbered placeholders.
    ///
    /// On raw SELECTs each `$N` gains an explicit type cast derived from the
    /// corresponding argument's kind, unless already followed by `::`.
    pub fn raw(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.mode = Mode::Raw;
        self.raw_sql = Some((sql.into(), args));
        self
    }

    /// Raw statement with `:name` placeholders.
    pub fn raw_named(mut self, sql: &str, named: &NamedArgs) -> DbResult<Self> {
        let (sql, args) = convert_named(sql, named)?;
        self.mode = Mode::Raw;
        self.raw_sql = Some((sql, args));
        Ok(self)
    }

    // ==================== Execution modifiers ====================

    /// Cache this query's map-form result under `key` for `ttl`.
    pub fn cache_key(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache_key = Some((key.into(), ttl));
        self
    }

    /// Invalidate these cache keys after a successful write.
    pub fn invalidate_keys(mut self, keys: &[&str]) -> Self {
        self.invalidate.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    /// Force execution on the primary.
    pub fn use_primary(mut self) -> Self {
        self.route = Route::Primary;
        self
    }

    /// Force execution on the read pool (primary when none is configured).
    pub fn use_read_pool(mut self) -> Self {
        self.route = Route::Read;
        self
    }

    /// Log this query at debug level regardless of the configured log mode.
    pub fn debug(mut self) -> Self {
        self.force_debug = true;
        self
    }
}
