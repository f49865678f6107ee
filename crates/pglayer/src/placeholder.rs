//! Placeholder conversion.
//!
//! Builders collect raw fragments with `?` positional or `:name` named
//! placeholders and convert them to PostgreSQL's numbered `$N` form in a
//! single pass at materialization time. All scanners treat single-quoted
//! string literals as opaque and pass `::` casts through untouched.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::{DbError, DbResult};
use crate::value::{Arg, IntoArg};

/// A named binding: one value, or a sequence expanded to a placeholder list.
enum NamedValue {
    Scalar(Arg),
    Seq(Vec<Arg>),
}

/// Named parameter bindings for `:name` templates.
///
/// # Example
/// ```ignore
/// let named = NamedArgs::new()
///     .bind("email", "a@x")
///     .bind_seq("ids", [1_i64, 2, 3]);
/// ```
#[derive(Default)]
pub struct NamedArgs {
    bindings: BTreeMap<String, NamedValue>,
}

impl NamedArgs {
    /// Create an empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a scalar value. Repeated template occurrences of the same name
    /// reuse one placeholder.
    pub fn bind(mut self, name: impl Into<String>, value: impl IntoArg) -> Self {
        self.bindings
            .insert(name.into(), NamedValue::Scalar(value.into_arg()));
        self
    }

    /// Bind a sequence, expanded to `($k, $k+1, …)` at the single template
    /// occurrence. An empty sequence expands to `(NULL)`.
    pub fn bind_seq<I, T>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoArg,
    {
        let values = values.into_iter().map(IntoArg::into_arg).collect();
        self.bindings.insert(name.into(), NamedValue::Seq(values));
        self
    }

    fn get(&self, name: &str) -> Option<&NamedValue> {
        self.bindings.get(name)
    }
}

/// Convert `?` placeholders to `$1, $2, …` starting at `start`.
///
/// Returns the converted SQL and the number of placeholders replaced.
pub(crate) fn convert_positional_from(sql: &str, start: usize) -> (String, usize) {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = start;
    let mut in_string = false;

    for ch in sql.chars() {
        if in_string {
            out.push(ch);
            if ch == '\'' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '\'' => {
                in_string = true;
                out.push(ch);
            }
            '?' => {
                let _ = write!(&mut out, "${index}");
                index += 1;
            }
            _ => out.push(ch),
        }
    }
    (out, index - start)
}

/// Convert `?` placeholders to `$1, $2, …` in order.
pub fn convert_positional(sql: &str) -> String {
    convert_positional_from(sql, 1).0
}

fn is_ident_start(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_alphabetic()
}

fn is_ident_continue(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_alphanumeric()
}

/// Convert `:name` placeholders to numbered form, starting at `start`.
///
/// Rules:
/// - identifier charset `[A-Za-z_][A-Za-z0-9_]*`;
/// - occurrences inside single-quoted strings are preserved verbatim;
/// - `::` (cast syntax) passes through untouched;
/// - scalar bindings reuse one `$N` on repeat;
/// - sequence bindings expand to `($k, …)` once; a second occurrence errors;
/// - a missing binding errors.
///
/// Returns the converted SQL and the arguments in placeholder order.
pub(crate) fn convert_named_from(
    sql: &str,
    named: &NamedArgs,
    start: usize,
) -> DbResult<(String, Vec<Arg>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut args: Vec<Arg> = Vec::new();
    let mut scalar_index: BTreeMap<&str, usize> = BTreeMap::new();
    let mut used_seqs: Vec<&str> = Vec::new();
    let mut next = start;
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
            ':' => {
                // `::` cast passes through whole.
                if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                if i + 1 >= bytes.len() || !is_ident_start(bytes[i + 1]) {
                    out.push(':');
                    i += 1;
                    continue;
                }
                let name_start = i + 1;
                let mut name_end = name_start;
                while name_end < bytes.len() && is_ident_continue(bytes[name_end]) {
                    name_end += 1;
                }
                let name = &sql[name_start..name_end];
                i = name_end;

                match named.get(name) {
                    None => return Err(DbError::missing_named_param(name)),
                    Some(NamedValue::Scalar(value)) => {
                        let idx = match scalar_index.get(name) {
                            Some(idx) => *idx,
                            None => {
                                let idx = next;
                                next += 1;
                                args.push(value.clone());
                                scalar_index.insert(name, idx);
                                idx
                            }
                        };
                        let _ = write!(&mut out, "${idx}");
                    }
                    Some(NamedValue::Seq(values)) => {
                        if used_seqs.contains(&name) {
                            return Err(DbError::repeated_sequence_param(name));
                        }
                        used_seqs.push(name);
                        if values.is_empty() {
                            out.push_str("(NULL)");
                        } else {
                            out.push('(');
                            for (j, value) in values.iter().enumerate() {
                                if j > 0 {
                                    out.push_str(", ");
                                }
                                let _ = write!(&mut out, "${next}");
                                next += 1;
                                args.push(value.clone());
                            }
                            out.push(')');
                        }
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    Ok((out, args))
}

/// Convert `:name` placeholders to `$1, $2, …`, returning SQL and arguments.
pub fn convert_named(sql: &str, named: &NamedArgs) -> DbResult<(String, Vec<Arg>)> {
    convert_named_from(sql, named, 1)
}

/// Convert `:name` placeholders to `?` form so the fragment can merge with
/// other positional conjuncts before the single numbering pass.
///
/// Scalar repeats duplicate the argument (one `?` each); sequence and
/// missing-binding rules match [`convert_named`].
pub(crate) fn convert_named_positional(
    sql: &str,
    named: &NamedArgs,
) -> DbResult<(String, Vec<Arg>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut args: Vec<Arg> = Vec::new();
    let mut used_seqs: Vec<&str> = Vec::new();
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
            ':' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                if i + 1 >= bytes.len() || !is_ident_start(bytes[i + 1]) {
                    out.push(':');
                    i += 1;
                    continue;
                }
                let name_start = i + 1;
                let mut name_end = name_start;
                while name_end < bytes.len() && is_ident_continue(bytes[name_end]) {
                    name_end += 1;
                }
                let name = &sql[name_start..name_end];
                i = name_end;

                match named.get(name) {
                    None => return Err(DbError::missing_named_param(name)),
                    Some(NamedValue::Scalar(value)) => {
                        out.push('?');
                        args.push(value.clone());
                    }
                    Some(NamedValue::Seq(values)) => {
                        if used_seqs.contains(&name) {
                            return Err(DbError::repeated_sequence_param(name));
                        }
                        used_seqs.push(name);
                        if values.is_empty() {
                            out.push_str("(NULL)");
                        } else {
                            out.push('(');
                            for (j, value) in values.iter().enumerate() {
                                if j > 0 {
                                    out.push_str(", ");
                                }
                                out.push('?');
                                args.push(value.clone());
                            }
                            out.push(')');
                        }
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    Ok((out, args))
}

/// Add `offset` to every `$N` placeholder in a single pass.
pub fn renumber_placeholders(sql: &str, offset: usize) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
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
                let digits_start = i + 1;
                let mut digits_end = digits_start;
                while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                    digits_end += 1;
                }
                let n: usize = sql[digits_start..digits_end].parse().unwrap_or(0);
                let _ = write!(&mut out, "${}", n + offset);
                i = digits_end;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_numbers_in_order() {
        assert_eq!(
            convert_positional("a = ? AND b = ? AND c = ?"),
            "a = $1 AND b = $2 AND c = $3"
        );
    }

    #[test]
    fn positional_skips_string_literals() {
        assert_eq!(
            convert_positional("a = '?' AND b = ?"),
            "a = '?' AND b = $1"
        );
    }

    #[test]
    fn positional_count_matches() {
        let sql = "? ? '? ?' ?";
        let converted = convert_positional(sql);
        assert_eq!(converted, "$1 $2 '? ?' $3");
    }

    #[test]
    fn positional_from_offset() {
        let (converted, count) = convert_positional_from("x = ? AND y = ?", 4);
        assert_eq!(converted, "x = $4 AND y = $5");
        assert_eq!(count, 2);
    }

    #[test]
    fn named_scalar_reused() {
        let named = NamedArgs::new().bind("email", "a@x");
        let (sql, args) =
            convert_named("email = :email OR backup = :email", &named).unwrap();
        assert_eq!(sql, "email = $1 OR backup = $1");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn named_sequence_expands() {
        let named = NamedArgs::new().bind_seq("ids", [1_i64, 2, 3]);
        let (sql, args) = convert_named("id IN :ids", &named).unwrap();
        assert_eq!(sql, "id IN ($1, $2, $3)");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn named_empty_sequence_is_null_tuple() {
        let named = NamedArgs::new().bind_seq("ids", Vec::<i64>::new());
        let (sql, args) = convert_named("id IN :ids", &named).unwrap();
        assert_eq!(sql, "id IN (NULL)");
        assert!(args.is_empty());
    }

    #[test]
    fn named_repeated_sequence_errors() {
        let named = NamedArgs::new().bind_seq("ids", [1_i64]);
        let err = convert_named("id IN :ids OR id IN :ids", &named).unwrap_err();
        assert!(err.is_validation());
        assert!(err.message().contains(":ids"));
    }

    #[test]
    fn named_missing_binding_errors() {
        let named = NamedArgs::new();
        let err = convert_named("id = :id", &named).unwrap_err();
        assert!(err.is_validation());
        assert!(err.message().contains(":id"));
    }

    #[test]
    fn named_preserves_string_literals_and_casts() {
        let named = NamedArgs::new().bind("id", 1_i64);
        let (sql, args) =
            convert_named("note = ':id' AND id = :id::bigint", &named).unwrap();
        assert_eq!(sql, "note = ':id' AND id = $1::bigint");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn named_mixed_scalar_and_sequence() {
        let named = NamedArgs::new()
            .bind("status", "active")
            .bind_seq("ids", [7_i64, 8]);
        let (sql, args) =
            convert_named("status = :status AND id IN :ids", &named).unwrap();
        assert_eq!(sql, "status = $1 AND id IN ($2, $3)");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn renumber_shifts_all() {
        assert_eq!(
            renumber_placeholders("a = $1 AND b = $2", 3),
            "a = $4 AND b = $5"
        );
    }

    #[test]
    fn renumber_handles_multidigit() {
        assert_eq!(renumber_placeholders("$9 $10 $11", 5), "$14 $15 $16");
    }

    #[test]
    fn renumber_skips_string_literals() {
        assert_eq!(renumber_placeholders("'$1' $1", 1), "'$1' $2");
    }
}
