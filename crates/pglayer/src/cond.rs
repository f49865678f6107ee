//! Condition DSL.
//!
//! Helpers produce [`Cond`] values: a SQL fragment with `?` positional
//! placeholders plus its arguments. Conditions compose with [`and`] / [`or`]
//! and feed builders (`filter_cond`) and repositories (`find`, `count`, …);
//! the final `?` → `$N` conversion happens in one pass at materialization.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

use crate::ident::quote_qualified;
use crate::value::{Arg, IntoArg};

/// A composable WHERE fragment: `?`-placeholder SQL plus arguments.
#[derive(Debug, Clone)]
pub struct Cond {
    expr: String,
    args: Vec<Arg>,
}

impl Cond {
    /// The fragment text, with `?` placeholders.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The fragment's arguments, in placeholder order.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Decompose into `(expr, args)`.
    pub fn into_parts(self) -> (String, Vec<Arg>) {
        (self.expr, self.args)
    }
}

fn cmp(column: &str, op: &str, value: impl IntoArg) -> Cond {
    Cond {
        expr: format!("{} {op} ?", quote_qualified(column)),
        args: vec![value.into_arg()],
    }
}

/// `column = ?`
pub fn eq(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, "=", value)
}

/// `column != ?`
pub fn ne(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, "!=", value)
}

/// `column > ?`
pub fn gt(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, ">", value)
}

/// `column >= ?`
pub fn ge(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, ">=", value)
}

/// `column < ?`
pub fn lt(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, "<", value)
}

/// `column <= ?`
pub fn le(column: &str, value: impl IntoArg) -> Cond {
    cmp(column, "<=", value)
}

/// `column IN (?, …)`. An empty sequence yields `1=0`.
pub fn in_list<I, T>(column: &str, values: I) -> Cond
where
    I: IntoIterator<Item = T>,
    T: IntoArg,
{
    let args: Vec<Arg> = values.into_iter().map(IntoArg::into_arg).collect();
    if args.is_empty() {
        return raw("1=0", Vec::new());
    }
    let placeholders = vec!["?"; args.len()].join(", ");
    Cond {
        expr: format!("{} IN ({placeholders})", quote_qualified(column)),
        args,
    }
}

/// A raw fragment with explicit arguments. The text is trusted as-is.
pub fn raw(expr: impl Into<String>, args: Vec<Arg>) -> Cond {
    Cond {
        expr: expr.into(),
        args,
    }
}

/// `column BETWEEN ? AND ?`
pub fn between(column: &str, from: impl IntoArg, to: impl IntoArg) -> Cond {
    Cond {
        expr: format!("{} BETWEEN ? AND ?", quote_qualified(column)),
        args: vec![from.into_arg(), to.into_arg()],
    }
}

/// Half-open timestamp window: `column >= ? AND column < ?`.
pub fn date_range(column: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Cond {
    let quoted = quote_qualified(column);
    Cond {
        expr: format!("{quoted} >= ? AND {quoted} < ?"),
        args: vec![from.into_arg(), to.into_arg()],
    }
}

/// A single UTC calendar day as a half-open window
/// `[midnight, next midnight)`.
pub fn on_date(column: &str, date: NaiveDate) -> Cond {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = date
        .checked_add_days(Days::new(1))
        .unwrap_or(date)
        .and_time(NaiveTime::MIN)
        .and_utc();
    date_range(column, start, end)
}

fn join(conds: Vec<Cond>, sep: &str, empty: &str) -> Cond {
    if conds.is_empty() {
        return raw(empty, Vec::new());
    }
    let mut expr = String::new();
    let mut args = Vec::new();
    for (i, cond) in conds.into_iter().enumerate() {
        if i > 0 {
            expr.push_str(sep);
        }
        expr.push('(');
        expr.push_str(&cond.expr);
        expr.push(')');
        args.extend(cond.args);
    }
    Cond { expr, args }
}

/// Conjunction; each part parenthesized. Empty input yields `1=1`.
pub fn and(conds: Vec<Cond>) -> Cond {
    join(conds, " AND ", "1=1")
}

/// Disjunction; each part parenthesized. Empty input yields `1=0`.
pub fn or(conds: Vec<Cond>) -> Cond {
    join(conds, " OR ", "1=0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_quote_columns() {
        let c = eq("email", "a@x");
        assert_eq!(c.expr(), r#""email" = ?"#);
        assert_eq!(c.args().len(), 1);

        let c = gt("u.age", 18_i32);
        assert_eq!(c.expr(), r#""u"."age" > ?"#);
    }

    #[test]
    fn in_list_renders_placeholders() {
        let c = in_list("id", [1_i64, 2, 3]);
        assert_eq!(c.expr(), r#""id" IN (?, ?, ?)"#);
        assert_eq!(c.args().len(), 3);
    }

    #[test]
    fn empty_in_list_is_false() {
        let c = in_list("id", Vec::<i64>::new());
        assert_eq!(c.expr(), "1=0");
        assert!(c.args().is_empty());
    }

    #[test]
    fn and_wraps_each_part() {
        let c = and(vec![eq("a", 1_i64), ne("b", 2_i64)]);
        assert_eq!(c.expr(), r#"("a" = ?) AND ("b" != ?)"#);
        assert_eq!(c.args().len(), 2);
    }

    #[test]
    fn empty_combinators() {
        assert_eq!(and(vec![]).expr(), "1=1");
        assert_eq!(or(vec![]).expr(), "1=0");
    }

    #[test]
    fn or_joins_with_or() {
        let c = or(vec![eq("a", 1_i64), eq("a", 2_i64)]);
        assert_eq!(c.expr(), r#"("a" = ?) OR ("a" = ?)"#);
    }

    #[test]
    fn between_binds_two() {
        let c = between("age", 10_i32, 20_i32);
        assert_eq!(c.expr(), r#""age" BETWEEN ? AND ?"#);
        assert_eq!(c.args().len(), 2);
    }

    #[test]
    fn on_date_is_half_open_utc_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let c = on_date("created_at", day);
        assert_eq!(c.expr(), r#""created_at" >= ? AND "created_at" < ?"#);
        let rendered = format!("{:?}", c.args());
        assert!(rendered.contains("2024-03-01"));
        assert!(rendered.contains("2024-03-02"));
    }
}
