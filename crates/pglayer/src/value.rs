//! Owned query parameters.
//!
//! Builders and repositories hold parameters as [`Arg`]: an `Arc`-boxed
//! `ToSql` value tagged with its source kind. The kind tag drives the
//! `$N::TYPE` cast decoration on raw SELECTs and the binary COPY column
//! types; the `Arc` keeps builders clone-cheap and `'static`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

/// Source kind of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// 8/16/32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Text.
    Text,
    /// Timestamp with time zone.
    Timestamp,
    /// UUID.
    Uuid,
    /// Raw bytes.
    Bytes,
    /// JSON document.
    Json,
    /// Anything else; never cast-decorated.
    Other,
}

impl ArgKind {
    /// The explicit cast appended to `$N` placeholders in raw SELECTs, when
    /// the kind warrants one. Kinds outside the decoration table return
    /// `None` and the placeholder is left bare.
    pub(crate) fn cast_suffix(&self) -> Option<&'static str> {
        match self {
            ArgKind::Int => Some("::INTEGER"),
            ArgKind::BigInt => Some("::BIGINT"),
            ArgKind::Bool => Some("::BOOLEAN"),
            ArgKind::Timestamp => Some("::TIMESTAMPTZ"),
            ArgKind::Bytes => Some("::BYTEA"),
            ArgKind::Text => Some("::TEXT"),
            _ => None,
        }
    }
}

/// An owned, shareable query parameter.
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn ToSql + Send + Sync>,
    kind: ArgKind,
}

impl Arg {
    /// Box a value with an explicit kind tag.
    pub fn new<T>(value: T, kind: ArgKind) -> Self
    where
        T: ToSql + Send + Sync + 'static,
    {
        Self {
            value: Arc::new(value),
            kind,
        }
    }

    /// The source kind of this parameter.
    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    /// Borrow as the reference form `tokio-postgres` executes with.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        self.value.as_ref() as &(dyn ToSql + Sync)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.value, f)
    }
}

/// Borrow a slice of [`Arg`] as the parameter slice the driver expects.
pub fn params_ref(args: &[Arg]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(Arg::as_to_sql).collect()
}

/// Render arguments for error context and (unmasked) logs.
pub fn render_args(args: &[Arg]) -> Vec<String> {
    args.iter().map(|a| format!("{a:?}")).collect()
}

/// Conversion into an [`Arg`] with the right kind tag.
pub trait IntoArg {
    /// Kind tag for this Rust type.
    const KIND: ArgKind;

    /// Convert into an owned parameter.
    fn into_arg(self) -> Arg;
}

macro_rules! impl_into_arg {
    ($($ty:ty => $kind:expr),+ $(,)?) => {
        $(
            impl IntoArg for $ty {
                const KIND: ArgKind = $kind;

                fn into_arg(self) -> Arg {
                    Arg::new(self, $kind)
                }
            }
        )+
    };
}

impl_into_arg! {
    i16 => ArgKind::Int,
    i32 => ArgKind::Int,
    i64 => ArgKind::BigInt,
    bool => ArgKind::Bool,
    f32 => ArgKind::Float,
    f64 => ArgKind::Double,
    String => ArgKind::Text,
    DateTime<Utc> => ArgKind::Timestamp,
    Uuid => ArgKind::Uuid,
    Vec<u8> => ArgKind::Bytes,
    serde_json::Value => ArgKind::Json,
}

impl IntoArg for &str {
    const KIND: ArgKind = ArgKind::Text;

    fn into_arg(self) -> Arg {
        Arg::new(self.to_string(), ArgKind::Text)
    }
}

impl<T> IntoArg for Option<T>
where
    T: IntoArg + ToSql + Send + Sync + 'static,
{
    const KIND: ArgKind = T::KIND;

    fn into_arg(self) -> Arg {
        Arg::new(self, T::KIND)
    }
}

impl IntoArg for Arg {
    const KIND: ArgKind = ArgKind::Other;

    fn into_arg(self) -> Arg {
        self
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// # Example
/// ```ignore
/// let args = pglayer::args!["a@x", 42_i64, true];
/// ```
#[macro_export]
macro_rules! args {
    () => { Vec::<$crate::Arg>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::IntoArg::into_arg($value)),+]
    };
}

/// Append explicit casts to `$N` placeholders in a raw SELECT.
///
/// Each `$N` whose corresponding argument has a decoratable kind gains a
/// `::TYPE` suffix to aid server-side type inference; placeholders already
/// followed by `::` are left untouched, as are placeholders inside
/// single-quoted string literals.
pub(crate) fn decorate_casts(sql: &str, args: &[Arg]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let ch = bytes[i] as char;
        if in_string {
            out.push(ch);
            if ch == '\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' => {
                in_string = true;
                out.push(ch);
                i += 1;
            }
            '$' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                out.push_str(&sql[start..i]);

                let already_cast = sql[i..].starts_with("::");
                if !already_cast {
                    let n: usize = sql[start + 1..i].parse().unwrap_or(0);
                    if let Some(arg) = n.checked_sub(1).and_then(|idx| args.get(idx))
                        && let Some(suffix) = arg.kind().cast_suffix()
                    {
                        out.push_str(suffix);
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}
