//! Public-API assembly scenarios: everything here materializes SQL without
//! touching a server (pools are lazy).

use chrono::{DateTime, Utc};
use pglayer::{Config, Db, Hooks, IntoArg, NamedArgs, args, cond, record};

record! {
    #[derive(Debug, Clone)]
    pub struct Gadget {
        id: i64 => "primary_key,auto_increment",
        name: String => "not_null",
        serial: String => "unique,varchar(64)",
        deleted_at: Option<DateTime<Utc>> => "",
        version: i64 => "version",
    }
}

impl Hooks for Gadget {}

fn db() -> Db {
    Config::new().connect().expect("config")
}

#[test]
fn model_query_is_scoped_and_quoted() {
    let built = db().model::<Gadget>().unwrap().build().unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM "gadgets" WHERE "deleted_at" IS NULL"#
    );
}

#[test]
fn conditions_compose_across_modules() {
    let built = db()
        .model::<Gadget>()
        .unwrap()
        .filter_cond(cond::and(vec![
            cond::eq("name", "widget"),
            cond::gt("version", 1_i64),
        ]))
        .order_by("id ASC")
        .after("id", 100_i64.into_arg())
        .limit(10)
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"SELECT * FROM "gadgets" WHERE ("name" = $1) AND ("version" > $2) AND "id" > $3 AND "deleted_at" IS NULL ORDER BY id ASC LIMIT 10"#
    );
    assert_eq!(built.args.len(), 3);
}

#[test]
fn named_parameters_surface_binding_errors() {
    let named = NamedArgs::new().bind("a", 1_i64);
    let err = db()
        .table("t")
        .filter_named("a = :a AND b = :b", &named)
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.message().contains(":b"));
}

#[test]
fn insert_struct_via_public_api() {
    let gadget = Gadget {
        id: 0,
        name: "g".to_string(),
        serial: "s-1".to_string(),
        deleted_at: None,
        version: 0,
    };
    let built = db()
        .table_quoted("gadgets")
        .insert_struct(&gadget)
        .unwrap()
        .build()
        .unwrap();
    // Auto-increment id skipped; zero version skipped (server default 1).
    assert_eq!(
        built.sql,
        r#"INSERT INTO "gadgets" ("name", "serial", "deleted_at") VALUES ($1, $2, $3)"#
    );
}

#[test]
fn upsert_shape_via_builder() {
    let built = db()
        .table_quoted("gadgets")
        .insert(&["serial", "name"])
        .values(args!["s-1", "g"])
        .on_conflict(&["serial"])
        .do_update_set("name = ?", args!["g2"])
        .returning(&["id", "version"])
        .build()
        .unwrap();
    assert_eq!(
        built.sql,
        r#"INSERT INTO "gadgets" ("serial", "name") VALUES ($1, $2) ON CONFLICT ("serial") DO UPDATE SET name = $3 RETURNING id, version"#
    );
}

#[tokio::test]
async fn last_requires_explicit_ordering() {
    let err = db()
        .model::<Gadget>()
        .unwrap()
        .last_as::<Gadget>()
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.message().contains("order_by"));
}

#[tokio::test]
async fn exec_insert_requires_returning() {
    let err = db()
        .table_quoted("gadgets")
        .insert(&["name"])
        .values(args!["g"])
        .exec_insert()
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn soft_delete_lifecycle_rejected_without_column() {
    record! {
        #[derive(Debug, Clone)]
        pub struct Hardware {
            id: i64 => "primary_key,auto_increment",
            label: String => "",
        }
    }
    impl Hooks for Hardware {}

    let db = db();
    let repo = db.repository::<Hardware>();
    assert!(repo.soft_delete(1_i64).await.unwrap_err().is_validation());
    assert!(repo.soft_delete_all().await.unwrap_err().is_validation());
    assert!(repo.restore(1_i64).await.unwrap_err().is_validation());
    assert!(repo.purge_trashed().await.unwrap_err().is_validation());
}

#[tokio::test]
async fn update_partial_rejects_unknown_columns() {
    let db = db();
    let err = db
        .repository::<Gadget>()
        .update_partial(1_i64, vec![("no_such_column", "x".into_arg())])
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.message().contains("no_such_column"));
}

#[tokio::test]
async fn update_partial_rejects_empty_set_without_touch_columns() {
    let db = db();
    let err = db
        .repository::<Gadget>()
        .update_partial(1_i64, vec![])
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn copy_rejects_unknown_columns_before_connecting() {
    let db = db();
    let gadget = Gadget {
        id: 0,
        name: "g".to_string(),
        serial: "s".to_string(),
        deleted_at: None,
        version: 1,
    };
    let err = db
        .repository::<Gadget>()
        .create_copy_from(&[gadget], &["name", "nope"])
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
