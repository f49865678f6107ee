//! Record descriptors: tag-driven table metadata.
//!
//! Every subsystem (builder, repository, migrator) shares one view of a
//! record type: the [`TableDescriptor`], parsed once from the field tags a
//! [`record!`](crate::record) invocation declares and memoized process-wide.
//!
//! Tag grammar (comma-separated tokens, parentheses protect embedded commas):
//!
//! ```text
//! primary_key            primary_key:<group>
//! auto_increment
//! unique                 unique:<group>          unique_name:<name>
//! index                  index:<name>            using:<method>     index_where:(<predicate>)
//! fk:<table>(<col>)      fk_name:<name>          on_delete:<action> deferrable  initially_deferred
//! not_null               nullable
//! default:<expr>         on_update:now()
//! version                rename:<old_column>
//! collate:<name>         comment:<text>          column:<name>
//! type:<pg_type>         <bare pg type, e.g. varchar(50)>
//! -                      ignore
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use heck::ToSnakeCase;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::value::{Arg, ArgKind};

// ==================== Column types ====================

/// Inferred column metadata for a Rust field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Parameter kind, used for cast decoration and COPY column types.
    pub kind: ArgKind,
    /// Inferred PostgreSQL type, overridable per field.
    pub pg_type: &'static str,
    /// Whether the column is nullable by default (`Option<T>` fields).
    pub nullable: bool,
}

/// Rust types usable as record columns.
///
/// `zero()` is the insert-skip sentinel: a field holding its zero value with
/// a declared column default is omitted from INSERT so the server applies
/// the default.
pub trait ColumnType: Sized {
    /// Inferred column metadata.
    fn type_info() -> TypeInfo;

    /// The type's zero value.
    fn zero() -> Self;

    /// Whether this value equals the zero value.
    fn is_zero(&self) -> bool;
}

macro_rules! impl_column_type {
    ($($ty:ty => ($kind:expr, $pg:expr, $zero:expr, $is_zero:expr)),+ $(,)?) => {
        $(
            impl ColumnType for $ty {
                fn type_info() -> TypeInfo {
                    TypeInfo { kind: $kind, pg_type: $pg, nullable: false }
                }

                fn zero() -> Self {
                    $zero
                }

                fn is_zero(&self) -> bool {
                    let probe: fn(&$ty) -> bool = $is_zero;
                    probe(self)
                }
            }
        )+
    };
}

impl_column_type! {
    i16 => (ArgKind::Int, "INTEGER", 0, |v| *v == 0),
    i32 => (ArgKind::Int, "INTEGER", 0, |v| *v == 0),
    i64 => (ArgKind::BigInt, "BIGINT", 0, |v| *v == 0),
    bool => (ArgKind::Bool, "BOOLEAN", false, |v| !*v),
    f32 => (ArgKind::Float, "REAL", 0.0, |v| *v == 0.0),
    f64 => (ArgKind::Double, "DOUBLE PRECISION", 0.0, |v| *v == 0.0),
    String => (ArgKind::Text, "TEXT", String::new(), |v| v.is_empty()),
    Vec<u8> => (ArgKind::Bytes, "BYTEA", Vec::new(), |v| v.is_empty()),
    Uuid => (ArgKind::Uuid, "UUID", Uuid::nil(), |v| v.is_nil()),
    serde_json::Value => (ArgKind::Json, "JSONB", serde_json::Value::Null, |v| v.is_null()),
}

impl ColumnType for DateTime<Utc> {
    fn type_info() -> TypeInfo {
        TypeInfo {
            kind: ArgKind::Timestamp,
            pg_type: "TIMESTAMPTZ",
            nullable: false,
        }
    }

    fn zero() -> Self {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn is_zero(&self) -> bool {
        *self == DateTime::<Utc>::UNIX_EPOCH
    }
}

impl<T: ColumnType> ColumnType for Option<T> {
    fn type_info() -> TypeInfo {
        TypeInfo {
            nullable: true,
            ..T::type_info()
        }
    }

    fn zero() -> Self {
        None
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

// ==================== Record trait ====================

/// Static field metadata emitted by the [`record!`](crate::record) macro.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Rust field name.
    pub name: &'static str,
    /// Tag string in the grammar above.
    pub tag: &'static str,
    /// Type inference hook.
    pub type_info: fn() -> TypeInfo,
}

/// A persistent record type.
///
/// Implemented by the [`record!`](crate::record) macro; the descriptor for a
/// record is built lazily from `field_specs()` and cached process-wide.
pub trait Record: Send + Sync + Sized + 'static {
    /// The Rust type name, used to infer the table name.
    fn type_name() -> &'static str;

    /// Explicit table-name override (for irregular plurals).
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Declared fields, in order.
    fn field_specs() -> &'static [FieldSpec];

    /// The current value of a field as a bindable parameter.
    fn arg(&self, field: &str) -> Option<Arg>;

    /// Whether a field currently holds its zero value.
    fn is_zero_field(&self, field: &str) -> bool;
}

// ==================== Descriptor data ====================

/// Secondary index declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSpec {
    /// Explicit index name; defaults to `idx_<table>_<column>`.
    pub name: Option<String>,
    /// Index method (`btree`, `gin`, `hash`).
    pub method: Option<String>,
    /// Partial-index predicate.
    pub predicate: Option<String>,
}

/// Foreign-key declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    /// ON DELETE action (`cascade`, `restrict`, `set null`, `set default`).
    pub on_delete: Option<String>,
    /// Explicit constraint name; defaults to `fk_<table>_<column>`.
    pub name: Option<String>,
    /// DEFERRABLE flag.
    pub deferrable: bool,
    /// INITIALLY DEFERRED flag.
    pub initially_deferred: bool,
}

/// Parsed metadata for one column.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Rust field name.
    pub field: String,
    /// Column name (explicit, or snake_case of the field name).
    pub column: String,
    /// PostgreSQL type (inferred or overridden), canonical uppercase.
    pub pg_type: String,
    /// Parameter kind for this column.
    pub kind: ArgKind,
    /// Nullability after tag resolution.
    pub nullable: bool,
    /// Column default expression.
    pub default: Option<String>,
    /// Set the column to `NOW()` on every update.
    pub on_update_now: bool,
    /// Primary key flag.
    pub primary_key: bool,
    /// Composite primary key group.
    pub primary_key_group: Option<String>,
    /// Serial/identity column.
    pub auto_increment: bool,
    /// Unique flag.
    pub unique: bool,
    /// Composite unique group.
    pub unique_group: Option<String>,
    /// Explicit unique constraint name.
    pub unique_name: Option<String>,
    /// Secondary index, if declared.
    pub index: Option<IndexSpec>,
    /// Foreign key, if declared.
    pub foreign_key: Option<ForeignKeySpec>,
    /// Optimistic-locking counter flag.
    pub version: bool,
    /// Previous column name for rename migrations.
    pub rename_from: Option<String>,
    /// Column comment.
    pub comment: Option<String>,
    /// Collation.
    pub collate: Option<String>,
}

/// Parsed metadata for one record type.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// Table name.
    pub table: String,
    /// Non-ignored columns, in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Whether the table carries a `deleted_at` soft-delete column.
    pub soft_delete: bool,
    /// Index of the single (or first composite) primary key field.
    pub primary_key: Option<usize>,
    /// Index of the version field.
    pub version_field: Option<usize>,
}

impl TableDescriptor {
    /// The primary-key field, or a `Validation` error when none exists.
    pub fn pk(&self) -> DbResult<&FieldDescriptor> {
        self.primary_key
            .map(|i| &self.fields[i])
            .ok_or_else(|| {
                DbError::validation(format!("table '{}' has no primary key", self.table))
            })
    }

    /// The version field, when the table uses optimistic locking.
    pub fn version(&self) -> Option<&FieldDescriptor> {
        self.version_field.map(|i| &self.fields[i])
    }

    /// Look up a field by its Rust field name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Look up a field by its column name.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Column name of a Rust field, or `None` when the field is ignored.
    pub fn column_of(&self, name: &str) -> Option<&str> {
        self.field_by_name(name).map(|f| f.column.as_str())
    }
}

// ==================== Tag parsing ====================

/// Split a tag on commas, treating parenthesized runs as opaque.
fn split_tokens(tag: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let bytes = tag.as_bytes();
    let mut depth = 0_i32;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                tokens.push(tag[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(tag[start..].trim());
    tokens.retain(|t| !t.is_empty());
    tokens
}

const KNOWN_PG_TYPES: &[&str] = &[
    "varchar",
    "character varying",
    "char",
    "text",
    "citext",
    "smallint",
    "int2",
    "integer",
    "int4",
    "int",
    "bigint",
    "int8",
    "serial",
    "bigserial",
    "boolean",
    "bool",
    "real",
    "float4",
    "double precision",
    "float8",
    "decimal",
    "numeric",
    "timestamptz",
    "timestamp with time zone",
    "timestamp",
    "date",
    "time",
    "interval",
    "uuid",
    "jsonb",
    "json",
    "bytea",
    "inet",
];

/// Whether a bare tag token reads as a PostgreSQL type.
fn looks_like_pg_type(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    KNOWN_PG_TYPES.iter().any(|name| {
        lower == *name
            || (lower.starts_with(name) && lower[name.len()..].starts_with('('))
    })
}

fn strip_outer_parens(s: &str) -> &str {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        inner.trim()
    } else {
        s
    }
}

const ON_DELETE_ACTIONS: &[&str] = &["cascade", "restrict", "set null", "set default"];
const INDEX_METHODS: &[&str] = &["btree", "gin", "hash"];

fn parse_field(spec: &FieldSpec) -> DbResult<Option<FieldDescriptor>> {
    let info = (spec.type_info)();
    let mut out = FieldDescriptor {
        field: spec.name.to_string(),
        column: spec.name.to_snake_case(),
        pg_type: info.pg_type.to_string(),
        kind: info.kind,
        nullable: info.nullable,
        default: None,
        on_update_now: false,
        primary_key: false,
        primary_key_group: None,
        auto_increment: false,
        unique: false,
        unique_group: None,
        unique_name: None,
        index: None,
        foreign_key: None,
        version: false,
        rename_from: None,
        comment: None,
        collate: None,
    };

    // FK modifiers may appear before the fk token itself; collected here and
    // applied after the loop.
    let mut fk_name: Option<String> = None;
    let mut fk_on_delete: Option<String> = None;
    let mut fk_deferrable = false;
    let mut fk_initially_deferred = false;

    for token in split_tokens(spec.tag) {
        let (key, value) = match token.split_once(':') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (token, None),
        };
        match (key, value) {
            ("-", None) | ("ignore", None) => return Ok(None),
            ("primary_key", None) => out.primary_key = true,
            ("primary_key", Some(group)) => {
                out.primary_key = true;
                out.primary_key_group = Some(group.to_string());
            }
            ("auto_increment", None) => out.auto_increment = true,
            ("unique", None) => out.unique = true,
            ("unique", Some(group)) => {
                out.unique = true;
                out.unique_group = Some(group.to_string());
            }
            ("unique_name", Some(name)) => {
                out.unique = true;
                out.unique_name = Some(name.to_string());
            }
            ("index", None) => {
                out.index.get_or_insert_with(IndexSpec::default);
            }
            ("index", Some(name)) => {
                out.index.get_or_insert_with(IndexSpec::default).name = Some(name.to_string());
            }
            ("using", Some(method)) => {
                let method = method.to_ascii_lowercase();
                if !INDEX_METHODS.contains(&method.as_str()) {
                    return Err(DbError::validation(format!(
                        "field '{}': unknown index method '{method}'",
                        spec.name
                    )));
                }
                out.index.get_or_insert_with(IndexSpec::default).method = Some(method);
            }
            ("index_where", Some(pred)) => {
                out.index.get_or_insert_with(IndexSpec::default).predicate =
                    Some(strip_outer_parens(pred).to_string());
            }
            ("fk", Some(target)) => {
                let (table, rest) = target.split_once('(').ok_or_else(|| {
                    DbError::validation(format!(
                        "field '{}': fk target must be table(column), got '{target}'",
                        spec.name
                    ))
                })?;
                let column = rest.strip_suffix(')').ok_or_else(|| {
                    DbError::validation(format!(
                        "field '{}': fk target must be table(column), got '{target}'",
                        spec.name
                    ))
                })?;
                out.foreign_key = Some(ForeignKeySpec {
                    table: table.trim().to_string(),
                    column: column.trim().to_string(),
                    on_delete: None,
                    name: None,
                    deferrable: false,
                    initially_deferred: false,
                });
            }
            ("fk_name", Some(name)) => fk_name = Some(name.to_string()),
            ("on_delete", Some(action)) => {
                let action = action.to_ascii_lowercase();
                if !ON_DELETE_ACTIONS.contains(&action.as_str()) {
                    return Err(DbError::validation(format!(
                        "field '{}': unknown on_delete action '{action}'",
                        spec.name
                    )));
                }
                fk_on_delete = Some(action);
            }
            ("deferrable", None) => fk_deferrable = true,
            ("initially_deferred", None) => {
                fk_deferrable = true;
                fk_initially_deferred = true;
            }
            ("not_null", None) => out.nullable = false,
            ("nullable", None) => out.nullable = true,
            ("default", Some(expr)) => out.default = Some(expr.to_string()),
            ("on_update", Some("now()")) => out.on_update_now = true,
            ("version", None) => {
                out.version = true;
                out.pg_type = "BIGINT".to_string();
                out.kind = ArgKind::BigInt;
                out.nullable = false;
                out.default.get_or_insert_with(|| "1".to_string());
            }
            ("rename", Some(old)) => out.rename_from = Some(old.to_string()),
            ("collate", Some(name)) => out.collate = Some(name.to_string()),
            ("comment", Some(text)) => out.comment = Some(text.to_string()),
            ("column", Some(name)) => out.column = name.to_string(),
            ("type", Some(pg_type)) => out.pg_type = pg_type.to_ascii_uppercase(),
            _ if looks_like_pg_type(token) => {
                out.pg_type = token.to_ascii_uppercase();
            }
            _ => {
                return Err(DbError::validation(format!(
                    "field '{}': unknown tag token '{token}'",
                    spec.name
                )));
            }
        }
    }

    match out.foreign_key.as_mut() {
        Some(fk) => {
            fk.name = fk_name;
            fk.on_delete = fk_on_delete;
            fk.deferrable = fk_deferrable;
            fk.initially_deferred = fk_initially_deferred;
        }
        None => {
            if fk_name.is_some() || fk_on_delete.is_some() || fk_deferrable {
                return Err(DbError::validation(format!(
                    "field '{}': foreign-key modifiers without fk",
                    spec.name
                )));
            }
        }
    }

    Ok(Some(out))
}

fn build_descriptor<T: Record>() -> DbResult<TableDescriptor> {
    let table = match T::table_name() {
        Some(name) => name.to_string(),
        None => format!("{}s", T::type_name().to_snake_case()),
    };

    let mut fields = Vec::new();
    for spec in T::field_specs() {
        if let Some(field) = parse_field(spec)? {
            fields.push(field);
        }
    }

    // Default primary key: a column named `id` with no explicit flag.
    if !fields.iter().any(|f| f.primary_key)
        && let Some(id) = fields.iter_mut().find(|f| f.column == "id")
    {
        id.primary_key = true;
    }

    // Column names must be unique post-rename resolution.
    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|other| other.column == field.column) {
            return Err(DbError::validation(format!(
                "table '{table}': duplicate column '{}'",
                field.column
            )));
        }
    }

    let pk_fields: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.primary_key)
        .map(|(i, _)| i)
        .collect();
    if pk_fields.len() > 1 {
        let groups: Vec<_> = pk_fields
            .iter()
            .map(|&i| fields[i].primary_key_group.clone())
            .collect();
        let first = &groups[0];
        if first.is_none() || groups.iter().any(|g| g != first) {
            return Err(DbError::validation(format!(
                "table '{table}': multiple primary keys require a shared group"
            )));
        }
    }

    let version_fields: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.version)
        .map(|(i, _)| i)
        .collect();
    if version_fields.len() > 1 {
        return Err(DbError::validation(format!(
            "table '{table}': multiple version columns"
        )));
    }

    let soft_delete = fields
        .iter()
        .any(|f| f.column == "deleted_at" && f.nullable && f.pg_type == "TIMESTAMPTZ");

    Ok(TableDescriptor {
        table,
        soft_delete,
        primary_key: pk_fields.first().copied(),
        version_field: version_fields.first().copied(),
        fields,
    })
}

// ==================== Descriptor cache ====================

type Cache = RwLock<HashMap<TypeId, Arc<TableDescriptor>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The memoized descriptor for a record type.
///
/// Built on first use and shared process-wide; reads take the shared lock.
pub fn descriptor_for<T: Record>() -> DbResult<Arc<TableDescriptor>> {
    let key = TypeId::of::<T>();
    if let Some(found) = cache().read().expect("descriptor cache lock").get(&key) {
        return Ok(found.clone());
    }

    let built = Arc::new(build_descriptor::<T>()?);
    let mut write = cache().write().expect("descriptor cache lock");
    Ok(write.entry(key).or_insert(built).clone())
}

// ==================== record! macro ====================

/// Declare a record type: the struct plus its `Record` and `FromRow` impls.
///
/// Each field carries a tag string in the descriptor grammar; field types
/// must implement [`ColumnType`]. An optional `table = "..."` line overrides
/// the inferred (pluralized snake_case) table name.
///
/// # Example
/// ```ignore
/// pglayer::record! {
///     #[derive(Debug, Clone)]
///     pub struct User {
///         id: i64 => "primary_key,auto_increment",
///         email: String => "unique,not_null",
///         deleted_at: Option<chrono::DateTime<chrono::Utc>> => "",
///         version: i64 => "version",
///     }
/// }
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $tag:literal
            ),+ $(,)?
        }
    ) => {
        $crate::record! {
            @impl
            meta: [$(#[$meta])*],
            table: [],
            vis: $vis,
            name: $name,
            fields: [$( $(#[$fmeta])* $fvis $field : $ty => $tag, )+]
        }
    };
    (
        $(#[$meta:meta])*
        table = $table:literal,
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $tag:literal
            ),+ $(,)?
        }
    ) => {
        $crate::record! {
            @impl
            meta: [$(#[$meta])*],
            table: [$table],
            vis: $vis,
            name: $name,
            fields: [$( $(#[$fmeta])* $fvis $field : $ty => $tag, )+]
        }
    };
    (
        @impl
        meta: [$(#[$meta:meta])*],
        table: [$($table:literal)?],
        vis: $vis:vis,
        name: $name:ident,
        fields: [$( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty => $tag:literal, )+]
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $ty, )+
        }

        impl $crate::Record for $name {
            fn type_name() -> &'static str {
                stringify!($name)
            }

            fn table_name() -> Option<&'static str> {
                let overrides: &[&'static str] = &[$( $table, )?];
                overrides.first().copied()
            }

            fn field_specs() -> &'static [$crate::FieldSpec] {
                const SPECS: &[$crate::FieldSpec] = &[
                    $(
                        $crate::FieldSpec {
                            name: stringify!($field),
                            tag: $tag,
                            type_info: <$ty as $crate::ColumnType>::type_info,
                        },
                    )+
                ];
                SPECS
            }

            fn arg(&self, field: &str) -> Option<$crate::Arg> {
                match field {
                    $(
                        stringify!($field) => {
                            Some($crate::IntoArg::into_arg(self.$field.clone()))
                        }
                    )+
                    _ => None,
                }
            }

            fn is_zero_field(&self, field: &str) -> bool {
                match field {
                    $(
                        stringify!($field) => $crate::ColumnType::is_zero(&self.$field),
                    )+
                    _ => false,
                }
            }
        }

        impl $crate::FromRow for $name {
            fn from_row(row: &$crate::Row) -> $crate::DbResult<Self> {
                let descriptor = $crate::descriptor_for::<Self>()?;
                Ok(Self {
                    $(
                        $field: match descriptor.column_of(stringify!($field)) {
                            Some(column) => $crate::RowExt::try_get_column(row, column)?,
                            None => $crate::ColumnType::zero(),
                        },
                    )+
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::record! {
        #[derive(Debug, Clone)]
        pub struct User {
            id: i64 => "primary_key,auto_increment",
            email: String => "unique,not_null",
            display_name: String => "rename:name",
            bio: Option<String> => "",
            deleted_at: Option<DateTime<Utc>> => "",
            version: i64 => "version",
        }
    }

    crate::record! {
        #[derive(Debug, Clone)]
        table = "people",
        pub struct Person {
            id: i64 => "",
            full_name: String => "varchar(120),not_null",
            team_id: Option<i64> => "fk:teams(id),on_delete:cascade,deferrable",
            note: String => "ignore",
        }
    }

    #[test]
    fn infers_table_name() {
        let d = descriptor_for::<User>().unwrap();
        assert_eq!(d.table, "users");
    }

    #[test]
    fn honors_table_override() {
        let d = descriptor_for::<Person>().unwrap();
        assert_eq!(d.table, "people");
    }

    #[test]
    fn id_defaults_to_primary_key() {
        let d = descriptor_for::<Person>().unwrap();
        assert_eq!(d.pk().unwrap().column, "id");
    }

    #[test]
    fn type_override_replaces_inferred() {
        let d = descriptor_for::<Person>().unwrap();
        let f = d.field_by_column("full_name").unwrap();
        assert_eq!(f.pg_type, "VARCHAR(120)");
        assert!(!f.nullable);
    }

    #[test]
    fn ignore_excludes_field() {
        let d = descriptor_for::<Person>().unwrap();
        assert!(d.field_by_name("note").is_none());
        assert!(d.column_of("note").is_none());
    }

    #[test]
    fn option_fields_are_nullable() {
        let d = descriptor_for::<User>().unwrap();
        assert!(d.field_by_column("bio").unwrap().nullable);
        assert!(!d.field_by_column("email").unwrap().nullable);
    }

    #[test]
    fn soft_delete_detected() {
        let d = descriptor_for::<User>().unwrap();
        assert!(d.soft_delete);
        let p = descriptor_for::<Person>().unwrap();
        assert!(!p.soft_delete);
    }

    #[test]
    fn version_column_is_bigint_defaulted() {
        let d = descriptor_for::<User>().unwrap();
        let v = d.version().unwrap();
        assert_eq!(v.pg_type, "BIGINT");
        assert_eq!(v.default.as_deref(), Some("1"));
        assert!(!v.nullable);
    }

    #[test]
    fn rename_from_recorded() {
        let d = descriptor_for::<User>().unwrap();
        let f = d.field_by_column("display_name").unwrap();
        assert_eq!(f.rename_from.as_deref(), Some("name"));
    }

    #[test]
    fn foreign_key_parsed() {
        let d = descriptor_for::<Person>().unwrap();
        let fk = d
            .field_by_column("team_id")
            .unwrap()
            .foreign_key
            .clone()
            .unwrap();
        assert_eq!(fk.table, "teams");
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete.as_deref(), Some("cascade"));
        assert!(fk.deferrable);
        assert!(!fk.initially_deferred);
    }

    #[test]
    fn split_tokens_respects_parens() {
        assert_eq!(
            split_tokens("type:decimal(10,2),index_where:(a > 1 AND b < 2),unique"),
            vec!["type:decimal(10,2)", "index_where:(a > 1 AND b < 2)", "unique"]
        );
    }

    #[test]
    fn unknown_token_is_rejected() {
        let spec = FieldSpec {
            name: "x",
            tag: "primry_key",
            type_info: <i64 as ColumnType>::type_info,
        };
        assert!(parse_field(&spec).is_err());
    }

    #[test]
    fn bare_pg_type_token_recognized() {
        let spec = FieldSpec {
            name: "x",
            tag: "varchar(50)",
            type_info: <String as ColumnType>::type_info,
        };
        let f = parse_field(&spec).unwrap().unwrap();
        assert_eq!(f.pg_type, "VARCHAR(50)");
    }

    #[test]
    fn descriptor_is_cached() {
        let a = descriptor_for::<User>().unwrap();
        let b = descriptor_for::<User>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn record_arg_and_zero_probe() {
        let user = User {
            id: 0,
            email: "a@x".to_string(),
            display_name: String::new(),
            bio: None,
            deleted_at: None,
            version: 0,
        };
        assert!(user.is_zero_field("id"));
        assert!(!user.is_zero_field("email"));
        assert!(user.is_zero_field("display_name"));
        assert!(user.arg("email").is_some());
        assert!(user.arg("missing").is_none());
    }
}
