use std::sync::Arc;

use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use super::QueryBuilder;
use crate::config::LogMode;
use crate::cond;
use crate::envelope::{Envelope, Source};
use crate::metrics::NoopMetrics;
use crate::placeholder::NamedArgs;
use crate::value::IntoArg;
use crate::{args, record};

record! {
    #[derive(Debug, Clone)]
    pub struct Article {
        id: i64 => "primary_key,auto_increment",
        title: String => "not_null",
        deleted_at: Option<DateTime<Utc>> => "",
    }
}

record! {
    #[derive(Debug, Clone)]
    pub struct Plain {
        id: i64 => "primary_key,auto_increment",
        name: String => "",
    }
}

/// An envelope over a never-connected pool; builders materialize SQL
/// without touching a server.
fn detached_envelope() -> Arc<Envelope> {
    let manager = Manager::from_config(
        tokio_postgres::Config::new(),
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager).build().expect("pool");
    Arc::new(Envelope {
        primary: pool,
        read: None,
        breaker: None,
        retry_attempts: 0,
        retry_backoff: std::time::Duration::from_millis(0),
        log_mode: LogMode::Silent,
        mask_parameters: false,
        slow_query_threshold: None,
        query_timeout: None,
        statement_cache_capacity: 0,
        metrics: Arc::new(NoopMetrics),
        cache: None,
        audit: None,
        context_fields: None,
    })
}

fn qb() -> QueryBuilder<'static> {
    QueryBuilder::new(Source::Db(detached_envelope()))
}

#[test]
fn select_defaults_to_star() {
    let built = qb().table("users").build().unwrap();
    assert_eq!(built.sql, "SELECT * FROM users");
    assert!(built.args.is_empty());
}

#[test]
fn table_quoted_quotes_qualified_names() {
    let built = qb().table_quoted("public.users").build().unwrap();
    assert_eq!(built.sql, r#"SELECT * FROM "public"."users""#);
}

#[test]
fn filters_share_one_numbering_pass() {
    let built = qb()
        .table("users")
        .filter("email = ?", args!["a@x"])
        .filter("age > ? AND age < ?", args![18_i32, 60_i32])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users WHERE email = $1 AND age > $2 AND age < $3"
    );
    assert_eq!(built.args.len(), 3);
}

#[test]
fn filter_cond_merges_with_raw_filters() {
    let built = qb()
        .table("users")
        .filter("email = ?", args!["a@x"])
        .filter_cond(cond::in_list("id", [1_i64, 2]))
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM users WHERE email = $1 AND "id" IN ($2, $3)"#
    );
}

#[test]
fn filter_named_converts_then_merges() {
    let named = NamedArgs::new().bind("status", "active").bind_seq("ids", [1_i64, 2]);
    let built = qb()
        .table("users")
        .filter("tenant = ?", args![7_i64])
        .filter_named("status = :status AND id IN :ids", &named)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users WHERE tenant = $1 AND status = $2 AND id IN ($3, $4)"
    );
    assert_eq!(built.args.len(), 4);
}

#[test]
fn model_applies_soft_delete_scope() {
    let built = qb().model::<Article>().unwrap().build().unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM "articles" WHERE "deleted_at" IS NULL"#
    );
}

#[test]
fn with_trashed_drops_scope_conjunct() {
    let built = qb()
        .model::<Article>()
        .unwrap()
        .with_trashed()
        .build()
        .unwrap();
    assert_eq!(built.sql, r#"SELECT * FROM "articles""#);
}

#[test]
fn only_trashed_flips_scope_conjunct() {
    let built = qb()
        .model::<Article>()
        .unwrap()
        .only_trashed()
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM "articles" WHERE "deleted_at" IS NOT NULL"#
    );
}

#[test]
fn scope_has_no_effect_without_soft_delete_column() {
    let built = qb().model::<Plain>().unwrap().build().unwrap();
    assert_eq!(built.sql, r#"SELECT * FROM "plains""#);
}

#[test]
fn joins_append_verbatim() {
    let built = qb()
        .table("users u")
        .left_join("orders o", "o.user_id = u.id")
        .cross_join("regions")
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users u LEFT JOIN orders o ON o.user_id = u.id CROSS JOIN regions"
    );
}

#[test]
fn ordering_and_paging_render_inline() {
    let built = qb()
        .table("users")
        .order_by("created_at DESC")
        .limit(10)
        .offset(20)
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users ORDER BY created_at DESC LIMIT 10 OFFSET 20"
    );
}

#[test]
fn keyset_after_follows_ascending_order() {
    let built = qb()
        .table("users")
        .order_by("id ASC")
        .after("id", 42_i64.into_arg())
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM users WHERE "id" > $1 ORDER BY id ASC"#
    );
}

#[test]
fn keyset_after_flips_for_descending_order() {
    let built = qb()
        .table("users")
        .order_by("id DESC")
        .after("id", 42_i64.into_arg())
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM users WHERE "id" < $1 ORDER BY id DESC"#
    );
}

#[test]
fn keyset_before_mirrors_after() {
    let built = qb()
        .table("users")
        .order_by("id ASC")
        .before("id", 42_i64.into_arg())
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM users WHERE "id" < $1 ORDER BY id ASC"#
    );
}

#[test]
fn group_by_and_having_args_follow_where_args() {
    let built = qb()
        .table("orders")
        .select(&["user_id", "COUNT(*) AS n"])
        .filter("status = ?", args!["paid"])
        .group_by("user_id")
        .having("COUNT(*) > ?", args![5_i64])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT user_id, COUNT(*) AS n FROM orders WHERE status = $1 GROUP BY user_id HAVING COUNT(*) > $2"
    );
    assert_eq!(built.args.len(), 2);
}

#[test]
fn insert_numbers_sequentially_across_rows() {
    let built = qb()
        .table_quoted("users")
        .insert(&["email", "age"])
        .values(args!["a@x", 30_i32])
        .values(args!["b@x", 40_i32])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"INSERT INTO "users" ("email", "age") VALUES ($1, $2), ($3, $4)"#
    );
    assert_eq!(built.args.len(), 4);
}

#[test]
fn insert_row_arity_mismatch_is_rejected() {
    let err = qb()
        .table_quoted("users")
        .insert(&["email", "age"])
        .values(args!["a@x"])
        .build()
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn on_conflict_do_update_renumbers_past_insert_args() {
    let built = qb()
        .table_quoted("users")
        .insert(&["email", "age"])
        .values(args!["a@x", 30_i32])
        .on_conflict(&["email"])
        .do_update_set("age = ?", args![31_i32])
        .returning(&["id"])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"INSERT INTO "users" ("email", "age") VALUES ($1, $2) ON CONFLICT ("email") DO UPDATE SET age = $3 RETURNING id"#
    );
    assert_eq!(built.args.len(), 3);
}

#[test]
fn on_conflict_without_update_is_do_nothing() {
    let built = qb()
        .table_quoted("users")
        .insert(&["email"])
        .values(args!["a@x"])
        .on_conflict(&["email"])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"INSERT INTO "users" ("email") VALUES ($1) ON CONFLICT ("email") DO NOTHING"#
    );
}

#[test]
fn update_where_numbering_follows_set() {
    let built = qb()
        .table("users")
        .set("email = ?, age = ?", args!["b@x", 31_i32])
        .filter("id = ?", args![7_i64])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "UPDATE users SET email = $1, age = $2 WHERE id = $3"
    );
    assert_eq!(built.args.len(), 3);
}

#[test]
fn update_on_soft_delete_model_scopes_to_live_rows() {
    let built = qb()
        .model::<Article>()
        .unwrap()
        .set("title = ?", args!["t"])
        .filter("id = ?", args![1_i64])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"UPDATE "articles" SET title = $1 WHERE id = $2 AND "deleted_at" IS NULL"#
    );
}

#[test]
fn delete_is_soft_by_default_on_soft_delete_model() {
    let mut builder = qb().model::<Article>().unwrap().filter("id = ?", args![1_i64]);
    builder.mode = super::Mode::Delete;
    let built = builder.build().unwrap();
    assert_eq!(
        built.sql,
        r#"UPDATE "articles" SET "deleted_at" = NOW() WHERE id = $1 AND "deleted_at" IS NULL"#
    );
}

#[test]
fn hard_delete_emits_delete_from() {
    let mut builder = qb()
        .model::<Article>()
        .unwrap()
        .hard_delete()
        .with_trashed()
        .filter("id = ?", args![1_i64]);
    builder.mode = super::Mode::Delete;
    let built = builder.build().unwrap();
    assert_eq!(built.sql, r#"DELETE FROM "articles" WHERE id = $1"#);
}

#[test]
fn delete_without_model_is_hard() {
    let mut builder = qb().table("sessions").filter("expires_at < NOW()", args![]);
    builder.mode = super::Mode::Delete;
    let built = builder.build().unwrap();
    assert_eq!(built.sql, "DELETE FROM sessions WHERE expires_at < NOW()");
}

#[test]
fn raw_select_decorates_casts() {
    let built = qb()
        .raw("SELECT * FROM users WHERE id = $1 AND active = $2", args![7_i64, true])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users WHERE id = $1::BIGINT AND active = $2::BOOLEAN"
    );
}

#[test]
fn raw_select_respects_existing_casts() {
    let built = qb()
        .raw("SELECT * FROM users WHERE id = $1::int", args![7_i64])
        .build()
        .unwrap();
    assert_eq!(built.sql, "SELECT * FROM users WHERE id = $1::int");
}

#[test]
fn raw_dml_is_untouched() {
    let built = qb()
        .raw("UPDATE users SET active = $1", args![false])
        .build()
        .unwrap();
    assert_eq!(built.sql, "UPDATE users SET active = $1");
}

#[test]
fn raw_named_produces_numbered_sql() {
    let named = NamedArgs::new().bind("id", 7_i64);
    let built = qb()
        .raw_named("SELECT * FROM users WHERE id = :id OR parent = :id", &named)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM users WHERE id = $1::BIGINT OR parent = $1::BIGINT"
    );
    assert_eq!(built.args.len(), 1);
}

#[test]
fn insert_struct_skips_auto_pk_and_defaulted_zeroes() {
    let article = Article {
        id: 0,
        title: "hello".to_string(),
        deleted_at: None,
    };
    let built = qb().insert_struct(&article).unwrap().build().unwrap();
    assert_eq!(
        built.sql,
        r#"INSERT INTO "articles" ("title", "deleted_at") VALUES ($1, $2)"#
    );
    assert_eq!(built.args.len(), 2);
}

#[test]
fn update_struct_by_pk_targets_the_key() {
    let plain = Plain {
        id: 7,
        name: "n".to_string(),
    };
    let built = qb()
        .update_struct_by_pk(&plain, "id")
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"UPDATE "plains" SET "name" = $1 WHERE "id" = $2"#
    );
    assert_eq!(built.args.len(), 2);
}

#[test]
fn distinct_and_for_update_render() {
    let built = qb()
        .table("users")
        .select(&["id"])
        .distinct()
        .for_update()
        .build()
        .unwrap();
    assert_eq!(built.sql, "SELECT DISTINCT id FROM users FOR UPDATE");
}

#[test]
fn select_quoted_quotes_each_column() {
    let built = qb()
        .table("users")
        .select_quoted(&["id", "user.email"])
        .build()
        .unwrap();
    assert_eq!(built.sql, r#"SELECT "id", "user"."email" FROM users"#);
}
