//! SQL assembly for the query builder.
//!
//! Assembly rules:
//! - conjuncts (filters, keyset bounds, the soft-delete scope conjunct) are
//!   joined with ` AND ` and the whole statement's `?` placeholders are
//!   numbered in one pass;
//! - keyset direction follows the trailing `ASC`/`DESC` token of the first
//!   ORDER BY entry (ascending when absent);
//! - INSERT placeholders are numbered sequentially across rows; the
//!   ON CONFLICT SET expression is converted independently, then renumbered
//!   past the insert arguments.

use std::fmt::Write;

use super::{BuiltQuery, KeysetBound, Mode, QueryBuilder, Scope};
use crate::error::{DbError, DbResult};
use crate::ident::quote_qualified;
use crate::placeholder::{convert_positional, convert_positional_from, renumber_placeholders};
use crate::value::{Arg, decorate_casts};

impl QueryBuilder<'_> {
    /// Materialize into `(sql, args)`, consuming the builder.
    pub fn build(self) -> DbResult<BuiltQuery> {
        match self.mode {
            Mode::Select => self.build_select(),
            Mode::Insert => self.build_insert(),
            Mode::Update => self.build_update(),
            Mode::Delete => self.build_delete(),
            Mode::Raw => self.build_raw(),
        }
    }

    fn table_ref(&self) -> DbResult<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| DbError::validation("no table bound to query builder"))
    }

    /// Whether the ordering is ascending, judged by the first ORDER BY
    /// entry's trailing token.
    fn ordering_ascending(&self) -> bool {
        match self.order_by.first() {
            Some(expr) => !expr
                .rsplit(char::is_whitespace)
                .next()
                .is_some_and(|token| token.eq_ignore_ascii_case("DESC")),
            None => true,
        }
    }

    /// Collect WHERE conjuncts (filters, keyset bounds, scope conjunct) into
    /// one `?`-form clause plus its arguments.
    fn where_parts(&self) -> (Vec<String>, Vec<Arg>) {
        let mut conjuncts = Vec::new();
        let mut args = Vec::new();

        for (expr, expr_args) in &self.wheres {
            conjuncts.push(expr.clone());
            args.extend(expr_args.iter().cloned());
        }

        let ascending = self.ordering_ascending();
        for bound in &self.keyset {
            let op = match (bound.bound, ascending) {
                (KeysetBound::After, true) | (KeysetBound::Before, false) => ">",
                (KeysetBound::After, false) | (KeysetBound::Before, true) => "<",
            };
            conjuncts.push(format!("{} {op} ?", quote_qualified(&bound.column)));
            args.push(bound.value.clone());
        }

        if self.soft_delete_model {
            match self.scope {
                Scope::Default => conjuncts.push(r#""deleted_at" IS NULL"#.to_string()),
                Scope::OnlyTrashed => {
                    conjuncts.push(r#""deleted_at" IS NOT NULL"#.to_string());
                }
                Scope::WithTrashed => {}
            }
        }

        (conjuncts, args)
    }

    fn build_select(self) -> DbResult<BuiltQuery> {
        let table = self.table_ref()?.to_string();
        let projection = if self.projection.is_empty() {
            "*".to_string()
        } else {
            self.projection.join(", ")
        };

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&projection);
        sql.push_str(" FROM ");
        sql.push_str(&table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        let (conjuncts, mut args) = self.where_parts();
        if !conjuncts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts.join(" AND "));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some((having, having_args)) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
            args.extend(having_args.iter().cloned());
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(&mut sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset {
            let _ = write!(&mut sql, " OFFSET {offset}");
        }
        if self.for_update {
            sql.push_str(" FOR UPDATE");
        }

        Ok(BuiltQuery {
            sql: convert_positional(&sql),
            args,
        })
    }

    fn build_insert(self) -> DbResult<BuiltQuery> {
        let table = self.table_ref()?.to_string();
        if self.insert_columns.is_empty() {
            return Err(DbError::validation("insert requires a column list"));
        }
        if self.insert_rows.is_empty() {
            return Err(DbError::validation("insert requires at least one row"));
        }
        for row in &self.insert_rows {
            if row.len() != self.insert_columns.len() {
                return Err(DbError::validation(format!(
                    "insert row has {} values for {} columns",
                    row.len(),
                    self.insert_columns.len()
                )));
            }
        }

        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES ",
            self.insert_columns.join(", ")
        );
        let mut args: Vec<Arg> = Vec::new();
        let mut placeholder = 1;
        for (i, row) in self.insert_rows.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    sql.push_str(", ");
                }
                let _ = write!(&mut sql, "${placeholder}");
                placeholder += 1;
                args.push(value.clone());
            }
            sql.push(')');
        }

        if !self.conflict_columns.is_empty() {
            sql.push_str(" ON CONFLICT (");
            sql.push_str(&self.conflict_columns.join(", "));
            sql.push(')');
            match &self.conflict_update {
                Some((set_expr, set_args)) => {
                    let converted = convert_positional(set_expr);
                    let renumbered = renumber_placeholders(&converted, args.len());
                    sql.push_str(" DO UPDATE SET ");
                    sql.push_str(&renumbered);
                    args.extend(set_args.iter().cloned());
                }
                None => sql.push_str(" DO NOTHING"),
            }
        }

        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.returning.join(", "));
        }

        Ok(BuiltQuery { sql, args })
    }

    fn build_update(self) -> DbResult<BuiltQuery> {
        let table = self.table_ref()?.to_string();
        let (set_expr, set_args) = self
            .set_clause
            .as_ref()
            .ok_or_else(|| DbError::validation("update requires a set expression"))?;

        let (converted_set, set_count) = convert_positional_from(set_expr, 1);
        let mut sql = format!("UPDATE {table} SET {converted_set}");
        let mut args: Vec<Arg> = set_args.clone();

        let (conjuncts, where_args) = self.where_parts();
        if !conjuncts.is_empty() {
            let (converted_where, _) =
                convert_positional_from(&conjuncts.join(" AND "), set_count + 1);
            sql.push_str(" WHERE ");
            sql.push_str(&converted_where);
            args.extend(where_args);
        }

        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.returning.join(", "));
        }

        Ok(BuiltQuery { sql, args })
    }

    fn build_delete(self) -> DbResult<BuiltQuery> {
        let table = self.table_ref()?.to_string();
        let soft = self.soft_delete_model && !self.hard_delete;

        let (mut conjuncts, args) = self.where_parts();
        let mut sql = if soft {
            // Scope conjunct was produced by where_parts for the default
            // scope already; the soft delete itself only touches live rows.
            if self.scope == Scope::WithTrashed {
                conjuncts.push(r#""deleted_at" IS NULL"#.to_string());
            }
            format!(r#"UPDATE {table} SET "deleted_at" = NOW()"#)
        } else {
            format!("DELETE FROM {table}")
        };

        if !conjuncts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts.join(" AND "));
        }

        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.returning.join(", "));
        }

        Ok(BuiltQuery {
            sql: convert_positional(&sql),
            args,
        })
    }

    fn build_raw(self) -> DbResult<BuiltQuery> {
        let (sql, args) = self
            .raw_sql
            .ok_or_else(|| DbError::validation("raw builder has no statement"))?;

        let trimmed = sql.trim_start();
        let is_select = trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("SELECT");
        let sql = if is_select {
            decorate_casts(&sql, &args)
        } else {
            sql
        };

        Ok(BuiltQuery { sql, args })
    }
}
