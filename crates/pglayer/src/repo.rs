//! The generic repository.
//!
//! `Repository<T>` derives every operation from `T`'s descriptor and runs it
//! through the execution envelope: CRUD, partial update, bulk insert via
//! binary COPY, optimistic locking, the soft-delete lifecycle, upsert, and
//! paging. Scope views (`with_trashed`, `only_trashed`) return altered
//! copies; the repository itself is cheap to clone per call site.

use std::fmt::Write as _;
use std::marker::PhantomData;

use futures_util::pin_mut;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Type;

use crate::cond::Cond;
use crate::descriptor::{FieldDescriptor, Record, TableDescriptor, descriptor_for};
use crate::envelope::{Route, Source};
use crate::error::{DbError, DbResult, map_db_error};
use crate::hooks::{AuditEntry, Hooks};
use crate::ident::{quote_ident, quote_qualified};
use crate::placeholder::convert_positional;
use crate::qb::{QueryBuilder, Scope};
use crate::row::FromRow;
use crate::txn::DbTransaction;
use crate::value::{Arg, IntoArg, params_ref, render_args};

/// Paging parameters for [`Repository::find_page`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct PageRequest {
    /// Page size. Zero means no LIMIT.
    pub limit: i64,
    /// Row offset.
    pub offset: i64,
    /// Optional ORDER BY expression.
    pub order_by: Option<String>,
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    /// The page items.
    pub items: Vec<T>,
    /// Total rows matching the filters, ignoring limit/offset.
    pub total: i64,
    /// Echo of the requested limit.
    pub limit: i64,
    /// Echo of the requested offset.
    pub offset: i64,
}

/// Descriptor-driven data access for one record type.
pub struct Repository<'a, T: Record> {
    source: Source<'a>,
    scope: Scope,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Record> Repository<'a, T> {
    pub(crate) fn new(source: Source<'a>) -> Self {
        Self {
            source,
            scope: Scope::Default,
            _marker: PhantomData,
        }
    }

    pub(crate) fn for_tx(tx: &'a DbTransaction) -> Self {
        Self::new(Source::Tx(tx))
    }

    /// A view of this repository that includes trashed rows.
    pub fn with_trashed(&self) -> Self {
        Self {
            source: self.source.clone_ref(),
            scope: Scope::WithTrashed,
            _marker: PhantomData,
        }
    }

    /// A view of this repository restricted to trashed rows.
    pub fn only_trashed(&self) -> Self {
        Self {
            source: self.source.clone_ref(),
            scope: Scope::OnlyTrashed,
            _marker: PhantomData,
        }
    }

    /// A scope-aware builder bound to `T`'s table.
    pub fn builder(&self) -> DbResult<QueryBuilder<'a>> {
        let builder = QueryBuilder::new(self.source.clone_ref()).model::<T>()?;
        Ok(match self.scope {
            Scope::Default => builder,
            Scope::WithTrashed => builder.with_trashed(),
            Scope::OnlyTrashed => builder.only_trashed(),
        })
    }

    fn audit(
        &self,
        action: &str,
        table: &str,
        entity_id: Option<String>,
        entity: Option<String>,
        query: &str,
        error: Option<&DbError>,
    ) {
        if let Some(hook) = self.source.envelope().audit() {
            hook.record(AuditEntry {
                action: action.to_string(),
                table: table.to_string(),
                entity_id,
                entity,
                query: query.to_string(),
                error: error.map(|e| e.to_string()),
            });
        }
    }

    fn require_soft_delete(descriptor: &TableDescriptor) -> DbResult<()> {
        if descriptor.soft_delete {
            Ok(())
        } else {
            Err(DbError::validation(format!(
                "table '{}' has no soft-delete column",
                descriptor.table
            )))
        }
    }

    /// Columns and values for INSERT: skips the auto-increment primary key,
    /// ignored fields, and zero-valued fields with a declared default.
    fn insert_parts(
        descriptor: &TableDescriptor,
        entity: &T,
    ) -> DbResult<(Vec<String>, Vec<Arg>)> {
        let mut columns = Vec::new();
        let mut args = Vec::new();
        for field in &descriptor.fields {
            if field.primary_key && field.auto_increment {
                continue;
            }
            if field.default.is_some() && entity.is_zero_field(&field.field) {
                continue;
            }
            columns.push(quote_ident(&field.column));
            args.push(field_arg(entity, field)?);
        }
        Ok((columns, args))
    }
}

fn field_arg<T: Record>(entity: &T, field: &FieldDescriptor) -> DbResult<Arg> {
    entity.arg(&field.field).ok_or_else(|| {
        DbError::validation(format!("field '{}' has no value accessor", field.field))
    })
}

fn decode_scalar_i64(row: &tokio_postgres::Row) -> DbResult<i64> {
    row.try_get(0)
        .map_err(|e| DbError::validation(format!("decode error on column 0: {e}")))
}

fn placeholders(n: usize) -> String {
    let mut out = String::new();
    for i in 1..=n {
        if i > 1 {
            out.push_str(", ");
        }
        let _ = write!(&mut out, "${i}");
    }
    out
}

/// Map a descriptor column type to its binary-COPY wire type.
fn wire_type(pg_type: &str) -> DbResult<Type> {
    let base = pg_type
        .split('(')
        .next()
        .unwrap_or(pg_type)
        .trim()
        .to_ascii_uppercase();
    let mapped = match base.as_str() {
        "BIGINT" | "BIGSERIAL" => Type::INT8,
        "INTEGER" | "SERIAL" => Type::INT4,
        "SMALLINT" => Type::INT2,
        "BOOLEAN" => Type::BOOL,
        "REAL" => Type::FLOAT4,
        "DOUBLE PRECISION" => Type::FLOAT8,
        "TEXT" => Type::TEXT,
        "VARCHAR" | "CHARACTER VARYING" => Type::VARCHAR,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => Type::TIMESTAMPTZ,
        "UUID" => Type::UUID,
        "BYTEA" => Type::BYTEA,
        "JSONB" => Type::JSONB,
        "JSON" => Type::JSON,
        other => {
            return Err(DbError::validation(format!(
                "copy: unsupported column type '{other}'"
            )));
        }
    };
    Ok(mapped)
}

impl<T: Record> Repository<'_, T> {
    // ==================== Create ====================

    /// Insert one entity. Returns the generated key when the primary column
    /// is auto-increment.
    pub async fn create(&self, entity: &T) -> DbResult<Option<i64>>
    where
        T: Hooks + std::fmt::Debug,
    {
        let descriptor = descriptor_for::<T>()?;
        entity.before_create().await?;

        let (columns, args) = Self::insert_parts(&descriptor, entity)?;
        if columns.is_empty() {
            return Err(DbError::validation("no insertable columns"));
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_qualified(&descriptor.table),
            columns.join(", "),
            placeholders(args.len())
        );

        let auto_pk = descriptor
            .primary_key
            .map(|i| &descriptor.fields[i])
            .filter(|pk| pk.auto_increment);
        if let Some(pk) = auto_pk {
            let _ = write!(&mut sql, " RETURNING {}", quote_ident(&pk.column));
        }

        let source = self.source.clone_ref();
        let envelope = source.envelope();
        let result = if auto_pk.is_some() {
            match envelope.query(&source, Route::Primary, &sql, &args, false).await {
                Ok(rows) => match rows.first() {
                    Some(row) => decode_scalar_i64(row).map(Some),
                    None => Ok(None),
                },
                Err(err) => Err(err),
            }
        } else {
            envelope
                .execute(&source, &sql, &args, false)
                .await
                .map(|_| None)
        };

        self.audit(
            "create",
            &descriptor.table,
            result.as_ref().ok().and_then(|id| id.map(|v| v.to_string())),
            Some(format!("{entity:?}")),
            &sql,
            result.as_ref().err(),
        );
        let id = result?;
        entity.after_create().await?;
        Ok(id)
    }

    /// Insert entities one by one, aborting on the first error.
    ///
    /// Earlier inserts stay committed on failure; wrap the call in
    /// [`Db::with_transaction`](crate::Db::with_transaction) for atomicity.
    pub async fn create_batch(&self, entities: &[T]) -> DbResult<()>
    where
        T: Hooks + std::fmt::Debug,
    {
        for entity in entities {
            self.create(entity).await?;
        }
        Ok(())
    }

    /// Bulk insert over a single connection using binary COPY.
    ///
    /// `columns` names the target columns explicitly, in `db` name order.
    /// Returns the number of rows written.
    pub async fn create_copy_from(&self, entities: &[T], columns: &[&str]) -> DbResult<u64> {
        let descriptor = descriptor_for::<T>()?;
        let mut fields = Vec::with_capacity(columns.len());
        let mut types = Vec::with_capacity(columns.len());
        for column in columns {
            let field = descriptor.field_by_column(column).ok_or_else(|| {
                DbError::validation(format!(
                    "table '{}' has no column '{column}'",
                    descriptor.table
                ))
            })?;
            types.push(wire_type(&field.pg_type)?);
            fields.push(field);
        }

        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "COPY {} ({}) FROM STDIN BINARY",
            quote_qualified(&descriptor.table),
            column_list.join(", ")
        );

        let envelope = self.source.envelope();
        let started = std::time::Instant::now();

        // Breaker rejections are observed like any other copy attempt.
        let admission = match &envelope.breaker {
            Some(breaker) => match breaker.before() {
                Ok(admission) => Some(admission),
                Err(err) => {
                    envelope.metrics.observe_query("copy", started.elapsed());
                    envelope.metrics.incr_error(err.code().as_str());
                    self.audit(
                        "create_copy_from",
                        &descriptor.table,
                        None,
                        None,
                        &sql,
                        Some(&err),
                    );
                    return Err(err);
                }
            },
            None => None,
        };

        let result = match &self.source {
            Source::Db(_) => match envelope.acquire(Route::Primary).await {
                Ok(client) => copy_rows(&client, &sql, entities, &fields, &types).await,
                Err(err) => Err(err),
            },
            Source::Tx(tx) => copy_rows(tx.client(), &sql, entities, &fields, &types).await,
        };

        if let Some(breaker) = &envelope.breaker {
            match &result {
                Ok(_) => breaker.on_success(),
                Err(_) => breaker.on_failure(),
            }
        }
        drop(admission);
        envelope.metrics.observe_query("copy", started.elapsed());
        if let Err(err) = &result {
            envelope.metrics.incr_error(err.code().as_str());
        }

        self.audit(
            "create_copy_from",
            &descriptor.table,
            None,
            None,
            &sql,
            result.as_ref().err(),
        );
        result
    }

    // ==================== Read ====================

    /// Fetch one row by primary key; `NotFound` when absent (or trashed
    /// under the default scope).
    pub async fn get_by_id(&self, id: impl IntoArg) -> DbResult<T>
    where
        T: FromRow,
    {
        let descriptor = descriptor_for::<T>()?;
        let pk = descriptor.pk()?;
        self.builder()?
            .filter(
                &format!("{} = ?", quote_ident(&pk.column)),
                vec![id.into_arg()],
            )
            .first_as::<T>()
            .await
    }

    /// Fetch all rows matching the conditions (AND-combined), scope-aware.
    pub async fn find(&self, conds: Vec<Cond>) -> DbResult<Vec<T>>
    where
        T: FromRow,
    {
        let mut builder = self.builder()?;
        for cond in conds {
            builder = builder.filter_cond(cond);
        }
        builder.fetch_as::<T>().await
    }

    /// Fetch the first row matching the conditions; `NotFound` when none.
    pub async fn find_one(&self, conds: Vec<Cond>) -> DbResult<T>
    where
        T: FromRow,
    {
        let mut builder = self.builder()?;
        for cond in conds {
            builder = builder.filter_cond(cond);
        }
        builder.first_as::<T>().await
    }

    /// Count rows matching the conditions, scope-aware.
    pub async fn count(&self, conds: Vec<Cond>) -> DbResult<i64> {
        let mut builder = self.builder()?.select(&["COUNT(*)"]);
        for cond in conds {
            builder = builder.filter_cond(cond);
        }
        let route = builder.route;
        let source = self.source.clone_ref();
        let built = builder.build()?;
        let rows = source
            .envelope()
            .query(&source, route, &built.sql, &built.args, false)
            .await?;
        match rows.first() {
            Some(row) => decode_scalar_i64(row),
            None => Ok(0),
        }
    }

    /// Whether any row matches the conditions, scope-aware.
    pub async fn exists(&self, conds: Vec<Cond>) -> DbResult<bool> {
        Ok(self.count(conds).await? > 0)
    }

    /// A count plus one page of rows under the same filters.
    pub async fn find_page(&self, page: PageRequest, conds: Vec<Cond>) -> DbResult<Page<T>>
    where
        T: FromRow,
    {
        let total = self.count(conds.clone()).await?;

        let mut builder = self.builder()?;
        for cond in conds {
            builder = builder.filter_cond(cond);
        }
        if let Some(order) = &page.order_by {
            builder = builder.order_by(order);
        }
        if page.limit > 0 {
            builder = builder.limit(page.limit);
        }
        if page.offset > 0 {
            builder = builder.offset(page.offset);
        }
        let items = builder.fetch_as::<T>().await?;

        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    // ==================== Update ====================

    /// Write all non-primary fields of `entity`.
    ///
    /// With a version column, the statement carries the optimistic guard
    /// (`WHERE pk = $1 AND version = $2`, `SET version = version + 1`); zero
    /// affected rows surface as "optimistic lock conflict".
    /// `on_update:now()` columns are always set server-side.
    pub async fn update(&self, entity: &T) -> DbResult<()>
    where
        T: Hooks + std::fmt::Debug,
    {
        let descriptor = descriptor_for::<T>()?;
        let pk = descriptor.pk()?;
        entity.before_update().await?;

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for field in &descriptor.fields {
            if field.primary_key {
                continue;
            }
            if field.on_update_now {
                sets.push(format!("{} = NOW()", quote_ident(&field.column)));
            } else if field.version {
                let column = quote_ident(&field.column);
                sets.push(format!("{column} = {column} + 1"));
            } else {
                sets.push(format!("{} = ?", quote_ident(&field.column)));
                args.push(field_arg(entity, field)?);
            }
        }
        if sets.is_empty() {
            return Err(DbError::validation("no updatable columns"));
        }

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_qualified(&descriptor.table),
            sets.join(", "),
            quote_ident(&pk.column)
        );
        let pk_arg = field_arg(entity, pk)?;
        args.push(pk_arg.clone());

        let version = descriptor.version();
        if let Some(version) = version {
            let _ = write!(&mut sql, " AND {} = ?", quote_ident(&version.column));
            args.push(field_arg(entity, version)?);
        }
        let sql = convert_positional(&sql);

        let source = self.source.clone_ref();
        let result = source.envelope().execute(&source, &sql, &args, false).await;
        let result = match result {
            Ok(0) if version.is_some() => Err(DbError::optimistic_lock_conflict()
                .with_query(&sql, render_args(&args))),
            Ok(0) => {
                Err(DbError::not_found("no row matched update").with_query(&sql, render_args(&args)))
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        self.audit(
            "update",
            &descriptor.table,
            Some(format!("{pk_arg:?}")),
            Some(format!("{entity:?}")),
            &sql,
            result.as_ref().err(),
        );
        result?;
        entity.after_update().await?;
        Ok(())
    }

    /// Write only the given columns of the row with primary key `id`.
    ///
    /// `on_update:now()` columns absent from `fields` are set to `NOW()`;
    /// an empty field list still touches them when any exist.
    pub async fn update_partial(&self, id: impl IntoArg, fields: Vec<(&str, Arg)>) -> DbResult<()> {
        let descriptor = descriptor_for::<T>()?;
        let pk = descriptor.pk()?;

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for (column, value) in &fields {
            if descriptor.field_by_column(column).is_none() {
                return Err(DbError::validation(format!(
                    "table '{}' has no column '{column}'",
                    descriptor.table
                )));
            }
            sets.push(format!("{} = ?", quote_ident(column)));
            args.push(value.clone());
        }
        for field in &descriptor.fields {
            if field.on_update_now && !fields.iter().any(|(c, _)| c == &field.column) {
                sets.push(format!("{} = NOW()", quote_ident(&field.column)));
            }
        }
        if sets.is_empty() {
            return Err(DbError::validation("no fields to update"));
        }

        let sql = convert_positional(&format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_qualified(&descriptor.table),
            sets.join(", "),
            quote_ident(&pk.column)
        ));
        let id_arg = id.into_arg();
        args.push(id_arg.clone());

        let source = self.source.clone_ref();
        let result = match source.envelope().execute(&source, &sql, &args, false).await {
            Ok(0) => {
                Err(DbError::not_found("no row matched update").with_query(&sql, render_args(&args)))
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        self.audit(
            "update_partial",
            &descriptor.table,
            Some(format!("{id_arg:?}")),
            None,
            &sql,
            result.as_ref().err(),
        );
        result
    }

    /// Upsert: `INSERT … ON CONFLICT (conflict_columns) DO UPDATE SET
    /// col = EXCLUDED.col` for each update column.
    pub async fn upsert(
        &self,
        entity: &T,
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> DbResult<()>
    where
        T: Hooks + std::fmt::Debug,
    {
        let descriptor = descriptor_for::<T>()?;
        if conflict_columns.is_empty() {
            return Err(DbError::validation("upsert requires conflict columns"));
        }
        entity.before_upsert().await?;

        let (columns, args) = Self::insert_parts(&descriptor, entity)?;
        let conflict: Vec<String> = conflict_columns.iter().map(|c| quote_ident(c)).collect();
        let updates: Vec<String> = update_columns
            .iter()
            .map(|c| {
                let quoted = quote_ident(c);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({})",
            quote_qualified(&descriptor.table),
            columns.join(", "),
            placeholders(args.len()),
            conflict.join(", ")
        );
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            let _ = write!(&mut sql, " DO UPDATE SET {}", updates.join(", "));
        }

        let source = self.source.clone_ref();
        let result = source
            .envelope()
            .execute(&source, &sql, &args, false)
            .await
            .map(|_| ());

        self.audit(
            "upsert",
            &descriptor.table,
            None,
            Some(format!("{entity:?}")),
            &sql,
            result.as_ref().err(),
        );
        result?;
        entity.after_upsert().await?;
        Ok(())
    }

    // ==================== Delete & soft-delete lifecycle ====================

    /// Hard-delete the row with primary key `id`.
    pub async fn delete(&self, id: impl IntoArg) -> DbResult<()>
    where
        T: Hooks,
    {
        let descriptor = descriptor_for::<T>()?;
        let pk = descriptor.pk()?;
        let id_arg = id.into_arg();
        T::before_delete(&id_arg).await?;

        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_qualified(&descriptor.table),
            quote_ident(&pk.column)
        );
        let args = vec![id_arg.clone()];
        let source = self.source.clone_ref();
        let result = match source.envelope().execute(&source, &sql, &args, false).await {
            Ok(0) => Err(DbError::not_found("no row matched delete")
                .with_query(&sql, render_args(&args))),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        self.audit(
            "delete",
            &descriptor.table,
            Some(format!("{id_arg:?}")),
            None,
            &sql,
            result.as_ref().err(),
        );
        result?;
        T::after_delete(&id_arg).await?;
        Ok(())
    }

    /// Soft-delete the row with primary key `id` (sets `deleted_at`).
    ///
    /// `Validation` error when `T` has no soft-delete column.
    pub async fn soft_delete(&self, id: impl IntoArg) -> DbResult<()>
    where
        T: Hooks,
    {
        let descriptor = descriptor_for::<T>()?;
        Self::require_soft_delete(&descriptor)?;
        let pk = descriptor.pk()?;
        let id_arg = id.into_arg();
        T::before_soft_delete(&id_arg).await?;

        let sql = format!(
            "UPDATE {} SET \"deleted_at\" = NOW() WHERE {} = $1 AND \"deleted_at\" IS NULL",
            quote_qualified(&descriptor.table),
            quote_ident(&pk.column)
        );
        let args = vec![id_arg.clone()];
        let source = self.source.clone_ref();
        let result = match source.envelope().execute(&source, &sql, &args, false).await {
            Ok(0) => Err(DbError::not_found("no live row matched soft delete")
                .with_query(&sql, render_args(&args))),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        self.audit(
            "soft_delete",
            &descriptor.table,
            Some(format!("{id_arg:?}")),
            None,
            &sql,
            result.as_ref().err(),
        );
        result?;
        T::after_soft_delete(&id_arg).await?;
        Ok(())
    }

    /// Soft-delete every live row, regardless of the repository's scope
    /// view. Returns the affected row count.
    pub async fn soft_delete_all(&self) -> DbResult<u64> {
        let descriptor = descriptor_for::<T>()?;
        Self::require_soft_delete(&descriptor)?;

        let sql = format!(
            "UPDATE {} SET \"deleted_at\" = NOW() WHERE \"deleted_at\" IS NULL",
            quote_qualified(&descriptor.table)
        );
        let source = self.source.clone_ref();
        let result = source.envelope().execute(&source, &sql, &[], false).await;

        self.audit(
            "soft_delete_all",
            &descriptor.table,
            None,
            None,
            &sql,
            result.as_ref().err(),
        );
        result
    }

    /// Clear `deleted_at` on the row with primary key `id`.
    pub async fn restore(&self, id: impl IntoArg) -> DbResult<()>
    where
        T: Hooks,
    {
        let descriptor = descriptor_for::<T>()?;
        Self::require_soft_delete(&descriptor)?;
        let pk = descriptor.pk()?;
        let id_arg = id.into_arg();
        T::before_restore(&id_arg).await?;

        let sql = format!(
            "UPDATE {} SET \"deleted_at\" = NULL WHERE {} = $1 AND \"deleted_at\" IS NOT NULL",
            quote_qualified(&descriptor.table),
            quote_ident(&pk.column)
        );
        let args = vec![id_arg.clone()];
        let source = self.source.clone_ref();
        let result = match source.envelope().execute(&source, &sql, &args, false).await {
            Ok(0) => Err(DbError::not_found("no trashed row matched restore")
                .with_query(&sql, render_args(&args))),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        self.audit(
            "restore",
            &descriptor.table,
            Some(format!("{id_arg:?}")),
            None,
            &sql,
            result.as_ref().err(),
        );
        result?;
        T::after_restore(&id_arg).await?;
        Ok(())
    }

    /// Hard-delete every trashed row. Returns the affected row count.
    pub async fn purge_trashed(&self) -> DbResult<u64>
    where
        T: Hooks,
    {
        let descriptor = descriptor_for::<T>()?;
        Self::require_soft_delete(&descriptor)?;
        T::before_purge_trashed().await?;

        let sql = format!(
            "DELETE FROM {} WHERE \"deleted_at\" IS NOT NULL",
            quote_qualified(&descriptor.table)
        );
        let source = self.source.clone_ref();
        let result = source.envelope().execute(&source, &sql, &[], false).await;

        self.audit(
            "purge_trashed",
            &descriptor.table,
            None,
            None,
            &sql,
            result.as_ref().err(),
        );
        let purged = result?;
        T::after_purge_trashed().await?;
        Ok(purged)
    }
}

async fn copy_rows<T: Record>(
    client: &deadpool_postgres::Client,
    sql: &str,
    entities: &[T],
    fields: &[&FieldDescriptor],
    types: &[Type],
) -> DbResult<u64> {
    let sink = client
        .copy_in(sql)
        .await
        .map_err(|e| map_db_error(e, Some(sql), Vec::new()))?;
    let writer = BinaryCopyInWriter::new(sink, types);
    pin_mut!(writer);

    for entity in entities {
        let row: Vec<Arg> = fields
            .iter()
            .map(|field| field_arg(entity, field))
            .collect::<DbResult<_>>()?;
        let refs = params_ref(&row);
        writer
            .as_mut()
            .write(&refs)
            .await
            .map_err(|e| map_db_error(e, Some(sql), Vec::new()))?;
    }

    writer
        .as_mut()
        .finish()
        .await
        .map_err(|e| map_db_error(e, Some(sql), Vec::new()))
}
