//! Migration planning: diff descriptors against the live schema.
//!
//! The planner compares each registered descriptor with
//! `information_schema` (public schema) and sorts the resulting DDL into
//! four buckets: always-safe statements, unsafe changes (type /
//! nullability), destructive changes (column drops), and human-readable
//! warnings. Foreign keys are emitted after all tables so dependency cycles
//! are tolerated.

use std::collections::HashSet;
use std::fmt::Write;

use crate::descriptor::{FieldDescriptor, TableDescriptor};
use crate::ident::{quote_ident, quote_qualified};

/// The planned migration, bucketed by safety.
#[derive(Debug, Clone, Default)]
pub struct PlanResult {
    /// Always-safe DDL: create table, add column, add index/constraint.
    pub statements: Vec<String>,
    /// Type changes and nullability tightening.
    pub unsafe_statements: Vec<String>,
    /// Column drops for DB columns absent from the model.
    pub destructive_statements: Vec<String>,
    /// One line per unsafe or destructive diff.
    pub warnings: Vec<String>,
}

impl PlanResult {
    /// Whether the plan contains no DDL at all.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
            && self.unsafe_statements.is_empty()
            && self.destructive_statements.is_empty()
    }
}

/// A live column as reported by `information_schema.columns`.
#[derive(Debug, Clone)]
pub(crate) struct LiveColumn {
    pub(crate) name: String,
    pub(crate) data_type: String,
    pub(crate) is_nullable: bool,
    pub(crate) char_max_len: Option<i32>,
}

/// Live schema facts for one table.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveTable {
    /// `None` when the table does not exist.
    pub(crate) columns: Option<Vec<LiveColumn>>,
    pub(crate) index_names: HashSet<String>,
    pub(crate) constraint_names: HashSet<String>,
}

/// Normalize a type name so descriptor and live types compare canonically.
fn canonical_type(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.as_str() {
        "TIMESTAMP WITH TIME ZONE" => "TIMESTAMPTZ".to_string(),
        "CHARACTER VARYING" => "VARCHAR".to_string(),
        "INT8" => "BIGINT".to_string(),
        "INT4" | "INT" => "INTEGER".to_string(),
        "INT2" => "SMALLINT".to_string(),
        "BOOL" => "BOOLEAN".to_string(),
        "FLOAT4" => "REAL".to_string(),
        "FLOAT8" => "DOUBLE PRECISION".to_string(),
        _ => upper.replace("DECIMAL", "NUMERIC"),
    }
}

fn canonical_live_type(column: &LiveColumn) -> String {
    if column.data_type.eq_ignore_ascii_case("character varying") {
        return match column.char_max_len {
            Some(n) => format!("VARCHAR({n})"),
            None => "VARCHAR".to_string(),
        };
    }
    canonical_type(&column.data_type)
}

fn column_type_ddl(field: &FieldDescriptor) -> String {
    if field.auto_increment {
        match field.pg_type.as_str() {
            "BIGINT" => return "BIGSERIAL".to_string(),
            "INTEGER" | "SMALLINT" => return "SERIAL".to_string(),
            _ => {}
        }
    }
    field.pg_type.clone()
}

fn column_ddl(field: &FieldDescriptor, inline_pk: bool) -> String {
    let mut ddl = format!("{} {}", quote_ident(&field.column), column_type_ddl(field));
    if let Some(collate) = &field.collate {
        let _ = write!(&mut ddl, " COLLATE {}", quote_ident(collate));
    }
    if inline_pk {
        ddl.push_str(" PRIMARY KEY");
    } else if !field.nullable {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        let _ = write!(&mut ddl, " DEFAULT {default}");
    }
    ddl
}

fn unique_constraint_name(descriptor: &TableDescriptor, columns: &[&str]) -> String {
    format!("uq_{}_{}", descriptor.table, columns.join("_"))
}

fn index_name(descriptor: &TableDescriptor, field: &FieldDescriptor) -> String {
    field
        .index
        .as_ref()
        .and_then(|i| i.name.clone())
        .unwrap_or_else(|| format!("idx_{}_{}", descriptor.table, field.column))
}

fn fk_name(descriptor: &TableDescriptor, field: &FieldDescriptor) -> String {
    field
        .foreign_key
        .as_ref()
        .and_then(|fk| fk.name.clone())
        .unwrap_or_else(|| format!("fk_{}_{}", descriptor.table, field.column))
}

fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}

/// Unique constraints as `(name, columns)`: explicit singles plus grouped
/// composites in declaration order.
fn unique_constraints(descriptor: &TableDescriptor) -> Vec<(String, Vec<&str>)> {
    let mut out: Vec<(String, Vec<&str>)> = Vec::new();
    let mut seen_groups: Vec<&str> = Vec::new();

    for field in &descriptor.fields {
        if !field.unique {
            continue;
        }
        match &field.unique_group {
            Some(group) => {
                if seen_groups.contains(&group.as_str()) {
                    continue;
                }
                seen_groups.push(group);
                let columns: Vec<&str> = descriptor
                    .fields
                    .iter()
                    .filter(|f| f.unique_group.as_deref() == Some(group.as_str()))
                    .map(|f| f.column.as_str())
                    .collect();
                let name = field
                    .unique_name
                    .clone()
                    .unwrap_or_else(|| unique_constraint_name(descriptor, &columns));
                out.push((name, columns));
            }
            None => {
                let columns = vec![field.column.as_str()];
                let name = field
                    .unique_name
                    .clone()
                    .unwrap_or_else(|| unique_constraint_name(descriptor, &columns));
                out.push((name, columns));
            }
        }
    }
    out
}

fn primary_key_columns(descriptor: &TableDescriptor) -> Vec<&str> {
    descriptor
        .fields
        .iter()
        .filter(|f| f.primary_key)
        .map(|f| f.column.as_str())
        .collect()
}

fn create_table_sql(descriptor: &TableDescriptor) -> String {
    let pk_columns = primary_key_columns(descriptor);
    let single_pk = pk_columns.len() == 1;

    let mut column_defs = Vec::new();
    for field in &descriptor.fields {
        let inline_pk = single_pk && field.primary_key;
        column_defs.push(column_ddl(field, inline_pk));
    }
    if pk_columns.len() > 1 {
        let quoted: Vec<String> = pk_columns.iter().map(|c| quote_ident(c)).collect();
        column_defs.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(&descriptor.table),
        column_defs.join(", ")
    )
}

fn create_index_sql(descriptor: &TableDescriptor, field: &FieldDescriptor) -> String {
    let spec = field.index.as_ref().expect("index spec");
    let mut sql = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}",
        quote_ident(&index_name(descriptor, field)),
        quote_qualified(&descriptor.table)
    );
    if let Some(method) = &spec.method {
        let _ = write!(&mut sql, " USING {method}");
    }
    let _ = write!(&mut sql, " ({})", quote_ident(&field.column));
    if let Some(predicate) = &spec.predicate {
        let _ = write!(&mut sql, " WHERE {predicate}");
    }
    sql
}

fn add_fk_sql(descriptor: &TableDescriptor, field: &FieldDescriptor) -> String {
    let fk = field.foreign_key.as_ref().expect("fk spec");
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_qualified(&descriptor.table),
        quote_ident(&fk_name(descriptor, field)),
        quote_ident(&field.column),
        quote_qualified(&fk.table),
        quote_ident(&fk.column)
    );
    if let Some(action) = &fk.on_delete {
        let _ = write!(&mut sql, " ON DELETE {}", action.to_ascii_uppercase());
    }
    if fk.deferrable {
        sql.push_str(" DEFERRABLE");
        if fk.initially_deferred {
            sql.push_str(" INITIALLY DEFERRED");
        }
    }
    sql
}

fn comment_sql(descriptor: &TableDescriptor, field: &FieldDescriptor, text: &str) -> String {
    format!(
        "COMMENT ON COLUMN {}.{} IS '{}'",
        quote_qualified(&descriptor.table),
        quote_ident(&field.column),
        escape_literal(text)
    )
}

/// Diff one descriptor against its live table and fold the DDL into `plan`;
/// foreign-key statements accumulate in `deferred_fks` for emission after
/// all tables.
pub(crate) fn plan_table(
    descriptor: &TableDescriptor,
    live: &LiveTable,
    plan: &mut PlanResult,
    deferred_fks: &mut Vec<String>,
) {
    let table = quote_qualified(&descriptor.table);

    let Some(live_columns) = &live.columns else {
        // Fresh table: full create plus indexes, uniques, and comments.
        plan.statements.push(create_table_sql(descriptor));
        for (name, columns) in unique_constraints(descriptor) {
            let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            plan.statements.push(format!(
                "ALTER TABLE {table} ADD CONSTRAINT {} UNIQUE ({})",
                quote_ident(&name),
                quoted.join(", ")
            ));
        }
        for field in &descriptor.fields {
            if field.index.is_some() {
                plan.statements.push(create_index_sql(descriptor, field));
            }
            if let Some(comment) = &field.comment {
                plan.statements.push(comment_sql(descriptor, field, comment));
            }
            if field.foreign_key.is_some() {
                deferred_fks.push(add_fk_sql(descriptor, field));
            }
        }
        return;
    };

    let mut live_names: Vec<String> = live_columns.iter().map(|c| c.name.clone()).collect();

    for field in &descriptor.fields {
        let mut live_column = live_columns.iter().find(|c| c.name == field.column);

        // Rename resolution: old column present, new absent.
        if live_column.is_none()
            && let Some(old) = &field.rename_from
        {
            let old_exists = live_columns.iter().any(|c| &c.name == old);
            if old_exists {
                plan.statements.push(format!(
                    "ALTER TABLE {table} RENAME COLUMN {} TO {}",
                    quote_ident(old),
                    quote_ident(&field.column)
                ));
                live_column = live_columns.iter().find(|c| &c.name == old);
                if let Some(position) = live_names.iter().position(|n| n == old) {
                    live_names[position] = field.column.clone();
                }
            }
        } else if live_column.is_some()
            && let Some(old) = &field.rename_from
            && live_columns.iter().any(|c| &c.name == old)
        {
            plan.warnings.push(format!(
                "table {}: both '{}' and rename source '{}' exist; skipping rename",
                descriptor.table, field.column, old
            ));
        }

        let Some(live_column) = live_column else {
            plan.statements.push(format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {}",
                column_ddl(field, false)
            ));
            if let Some(comment) = &field.comment {
                plan.statements.push(comment_sql(descriptor, field, comment));
            }
            continue;
        };

        let model_type = canonical_type(&field.pg_type);
        let live_type = canonical_live_type(live_column);
        if model_type != live_type {
            plan.unsafe_statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {col} TYPE {ty} USING {col}::{ty}",
                col = quote_ident(&field.column),
                ty = field.pg_type
            ));
            plan.warnings.push(format!(
                "table {}: column '{}' type change {} -> {}",
                descriptor.table, field.column, live_type, model_type
            ));
        }
        if !field.nullable && live_column.is_nullable {
            plan.unsafe_statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {} SET NOT NULL",
                quote_ident(&field.column)
            ));
            plan.warnings.push(format!(
                "table {}: column '{}' tightened to NOT NULL",
                descriptor.table, field.column
            ));
        }
    }

    // DB columns absent from the model (post-rename) are destructive drops.
    for name in &live_names {
        if descriptor.field_by_column(name).is_none() {
            plan.destructive_statements.push(format!(
                "ALTER TABLE {table} DROP COLUMN {}",
                quote_ident(name)
            ));
            plan.warnings.push(format!(
                "table {}: column '{}' exists in DB but not in model",
                descriptor.table, name
            ));
        }
    }

    // Missing primary key / uniques / indexes / FKs, diffed by name.
    let pk_columns = primary_key_columns(descriptor);
    let pk_name = format!("{}_pkey", descriptor.table);
    if !pk_columns.is_empty() && !live.constraint_names.contains(&pk_name) {
        let quoted: Vec<String> = pk_columns.iter().map(|c| quote_ident(c)).collect();
        plan.statements.push(format!(
            "ALTER TABLE {table} ADD CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&pk_name),
            quoted.join(", ")
        ));
    }
    for (name, columns) in unique_constraints(descriptor) {
        if live.constraint_names.contains(&name) {
            continue;
        }
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        plan.statements.push(format!(
            "ALTER TABLE {table} ADD CONSTRAINT {} UNIQUE ({})",
            quote_ident(&name),
            quoted.join(", ")
        ));
    }
    for field in &descriptor.fields {
        if field.index.is_some() && !live.index_names.contains(&index_name(descriptor, field)) {
            plan.statements.push(create_index_sql(descriptor, field));
        }
        if field.foreign_key.is_some()
            && !live.constraint_names.contains(&fk_name(descriptor, field))
        {
            deferred_fks.push(add_fk_sql(descriptor, field));
        }
    }
}

/// Extract the target table of a DDL statement for plan grouping.
fn statement_table(statement: &str) -> Option<String> {
    let upper = statement.to_ascii_uppercase();
    let rest = if let Some(rest) = upper.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
        &statement["CREATE TABLE IF NOT EXISTS ".len()..][..rest.len()]
    } else if let Some(rest) = upper.strip_prefix("CREATE TABLE ") {
        &statement["CREATE TABLE ".len()..][..rest.len()]
    } else if let Some(rest) = upper.strip_prefix("ALTER TABLE ") {
        &statement["ALTER TABLE ".len()..][..rest.len()]
    } else {
        return None;
    };
    let token = rest.split_whitespace().next()?;
    let token = token.trim_end_matches('(');
    Some(token.replace('"', ""))
}

/// Render a plan grouped by table, with a leading warnings section.
pub fn format_plan(plan: &PlanResult) -> String {
    let mut out = String::new();

    if !plan.warnings.is_empty() {
        out.push_str("Warnings:\n");
        for warning in &plan.warnings {
            let _ = writeln!(&mut out, "  - {warning}");
        }
        out.push('\n');
    }

    let mut tables: Vec<String> = Vec::new();
    let buckets = [
        ("Statements", &plan.statements),
        ("Unsafe", &plan.unsafe_statements),
        ("Destructive", &plan.destructive_statements),
    ];
    for (_, bucket) in &buckets {
        for statement in bucket.iter() {
            if let Some(table) = statement_table(statement)
                && !tables.contains(&table)
            {
                tables.push(table);
            }
        }
    }

    for table in &tables {
        let _ = writeln!(&mut out, "Table {table}:");
        for (label, bucket) in &buckets {
            let grouped: Vec<&String> = bucket
                .iter()
                .filter(|s| statement_table(s).as_deref() == Some(table))
                .collect();
            if grouped.is_empty() {
                continue;
            }
            let _ = writeln!(&mut out, "  {label}:");
            for statement in grouped {
                let _ = writeln!(&mut out, "    {statement}");
            }
        }
        out.push('\n');
    }

    let globals: Vec<(&str, Vec<&String>)> = buckets
        .iter()
        .map(|(label, bucket)| {
            (
                *label,
                bucket
                    .iter()
                    .filter(|s| statement_table(s).is_none())
                    .collect::<Vec<_>>(),
            )
        })
        .filter(|(_, grouped)| !grouped.is_empty())
        .collect();
    if !globals.is_empty() {
        out.push_str("Global:\n");
        for (label, grouped) in globals {
            let _ = writeln!(&mut out, "  {label}:");
            for statement in grouped {
                let _ = writeln!(&mut out, "    {statement}");
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Record, descriptor_for};
    use chrono::{DateTime, Utc};

    crate::record! {
        #[derive(Debug, Clone)]
        pub struct Account {
            id: i64 => "primary_key,auto_increment",
            email: String => "unique,not_null",
            display_name: String => "rename:name",
            team_id: Option<i64> => "fk:teams(id),on_delete:cascade",
            bio: Option<String> => "index,using:gin",
            deleted_at: Option<DateTime<Utc>> => "",
            version: i64 => "version",
        }
    }

    fn descriptor() -> std::sync::Arc<crate::descriptor::TableDescriptor> {
        descriptor_for::<Account>().unwrap()
    }

    fn live(columns: Option<Vec<LiveColumn>>) -> LiveTable {
        LiveTable {
            columns,
            index_names: HashSet::new(),
            constraint_names: HashSet::new(),
        }
    }

    fn col(name: &str, data_type: &str, nullable: bool) -> LiveColumn {
        LiveColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: nullable,
            char_max_len: None,
        }
    }

    #[test]
    fn fresh_table_emits_create_and_constraints() {
        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor(), &live(None), &mut plan, &mut fks);

        assert!(plan.statements[0].starts_with(r#"CREATE TABLE IF NOT EXISTS "accounts" ("#));
        assert!(plan.statements[0].contains(r#""id" BIGSERIAL PRIMARY KEY"#));
        assert!(plan.statements[0].contains(r#""email" TEXT NOT NULL"#));
        assert!(plan.statements[0].contains(r#""version" BIGINT NOT NULL DEFAULT 1"#));
        assert!(
            plan.statements
                .iter()
                .any(|s| s.contains(r#"ADD CONSTRAINT "uq_accounts_email" UNIQUE ("email")"#))
        );
        assert!(
            plan.statements
                .iter()
                .any(|s| s.contains(r#"CREATE INDEX IF NOT EXISTS "idx_accounts_bio""#)
                    && s.contains("USING gin"))
        );
        assert_eq!(fks.len(), 1);
        assert!(fks[0].contains(r#"FOREIGN KEY ("team_id") REFERENCES "teams" ("id")"#));
        assert!(fks[0].contains("ON DELETE CASCADE"));
        assert!(plan.unsafe_statements.is_empty());
        assert!(plan.destructive_statements.is_empty());
    }

    #[test]
    fn rename_emits_single_rename_statement() {
        let columns = vec![
            col("id", "bigint", false),
            col("email", "text", false),
            col("name", "text", false),
            col("team_id", "bigint", true),
            col("bio", "text", true),
            col("deleted_at", "timestamp with time zone", true),
            col("version", "bigint", false),
        ];
        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        let mut live = live(Some(columns));
        live.constraint_names.insert("accounts_pkey".to_string());
        live.constraint_names.insert("uq_accounts_email".to_string());
        live.constraint_names.insert("fk_accounts_team_id".to_string());
        live.index_names.insert("idx_accounts_bio".to_string());
        plan_table(&descriptor(), &live, &mut plan, &mut fks);

        let renames: Vec<_> = plan
            .statements
            .iter()
            .filter(|s| s.contains("RENAME COLUMN"))
            .collect();
        assert_eq!(renames.len(), 1);
        assert_eq!(
            renames[0],
            &r#"ALTER TABLE "accounts" RENAME COLUMN "name" TO "display_name""#.to_string()
        );
        // Renamed column is not also dropped.
        assert!(plan.destructive_statements.is_empty());
        assert!(fks.is_empty());
    }

    #[test]
    fn matching_schema_produces_empty_plan() {
        let columns = vec![
            col("id", "bigint", false),
            col("email", "text", false),
            col("display_name", "text", false),
            col("team_id", "bigint", true),
            col("bio", "text", true),
            col("deleted_at", "timestamp with time zone", true),
            col("version", "bigint", false),
        ];
        let mut live = live(Some(columns));
        live.constraint_names.insert("accounts_pkey".to_string());
        live.constraint_names.insert("uq_accounts_email".to_string());
        live.constraint_names.insert("fk_accounts_team_id".to_string());
        live.index_names.insert("idx_accounts_bio".to_string());

        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor(), &live, &mut plan, &mut fks);

        assert!(plan.is_empty(), "unexpected plan: {plan:?}");
        assert!(fks.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn type_mismatch_is_unsafe_with_warning() {
        let columns = vec![
            col("id", "bigint", false),
            col("email", "integer", false),
            col("display_name", "text", false),
            col("team_id", "bigint", true),
            col("bio", "text", true),
            col("deleted_at", "timestamp with time zone", true),
            col("version", "bigint", false),
        ];
        let mut live = live(Some(columns));
        live.constraint_names.insert("accounts_pkey".to_string());
        live.constraint_names.insert("uq_accounts_email".to_string());
        live.constraint_names.insert("fk_accounts_team_id".to_string());
        live.index_names.insert("idx_accounts_bio".to_string());

        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor(), &live, &mut plan, &mut fks);

        assert_eq!(plan.unsafe_statements.len(), 1);
        assert_eq!(
            plan.unsafe_statements[0],
            r#"ALTER TABLE "accounts" ALTER COLUMN "email" TYPE TEXT USING "email"::TEXT"#
        );
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn nullable_mismatch_tightens_not_null() {
        let columns = vec![
            col("id", "bigint", false),
            col("email", "text", true),
            col("display_name", "text", false),
            col("team_id", "bigint", true),
            col("bio", "text", true),
            col("deleted_at", "timestamp with time zone", true),
            col("version", "bigint", false),
        ];
        let mut live = live(Some(columns));
        live.constraint_names.insert("accounts_pkey".to_string());
        live.constraint_names.insert("uq_accounts_email".to_string());
        live.constraint_names.insert("fk_accounts_team_id".to_string());
        live.index_names.insert("idx_accounts_bio".to_string());

        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor(), &live, &mut plan, &mut fks);

        assert!(
            plan.unsafe_statements
                .iter()
                .any(|s| s.ends_with(r#"ALTER COLUMN "email" SET NOT NULL"#))
        );
    }

    #[test]
    fn stray_db_column_is_destructive() {
        let columns = vec![
            col("id", "bigint", false),
            col("email", "text", false),
            col("display_name", "text", false),
            col("team_id", "bigint", true),
            col("bio", "text", true),
            col("deleted_at", "timestamp with time zone", true),
            col("version", "bigint", false),
            col("legacy", "text", true),
        ];
        let mut live = live(Some(columns));
        live.constraint_names.insert("accounts_pkey".to_string());
        live.constraint_names.insert("uq_accounts_email".to_string());
        live.constraint_names.insert("fk_accounts_team_id".to_string());
        live.index_names.insert("idx_accounts_bio".to_string());

        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor(), &live, &mut plan, &mut fks);

        assert_eq!(
            plan.destructive_statements,
            vec![r#"ALTER TABLE "accounts" DROP COLUMN "legacy""#.to_string()]
        );
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn varchar_length_is_compared() {
        assert_eq!(
            canonical_live_type(&LiveColumn {
                name: "n".into(),
                data_type: "character varying".into(),
                is_nullable: true,
                char_max_len: Some(50),
            }),
            "VARCHAR(50)"
        );
        assert_eq!(canonical_type("varchar(50)"), "VARCHAR(50)");
        assert_eq!(canonical_type("timestamp with time zone"), "TIMESTAMPTZ");
    }

    #[test]
    fn format_plan_groups_by_table() {
        let plan = PlanResult {
            statements: vec![
                r#"CREATE TABLE IF NOT EXISTS "users" ("id" BIGINT)"#.to_string(),
                r#"ALTER TABLE "users" ADD COLUMN IF NOT EXISTS "age" INTEGER"#.to_string(),
            ],
            unsafe_statements: vec![
                r#"ALTER TABLE "users" ALTER COLUMN "age" SET NOT NULL"#.to_string(),
            ],
            destructive_statements: vec![],
            warnings: vec!["table users: column 'age' tightened to NOT NULL".to_string()],
        };
        let rendered = format_plan(&plan);
        assert!(rendered.starts_with("Warnings:\n"));
        assert!(rendered.contains("Table users:\n"));
        assert!(rendered.contains("  Statements:\n"));
        assert!(rendered.contains("  Unsafe:\n"));
    }

    #[test]
    fn table_name_override_survives_in_ddl() {
        crate::record! {
            #[derive(Debug, Clone)]
            table = "folk",
            pub struct Person {
                id: i64 => "",
                name: String => "",
            }
        }
        let descriptor = descriptor_for::<Person>().unwrap();
        assert_eq!(Person::table_name(), Some("folk"));
        let mut plan = PlanResult::default();
        let mut fks = Vec::new();
        plan_table(&descriptor, &live(None), &mut plan, &mut fks);
        assert!(plan.statements[0].contains(r#""folk""#));
    }
}
