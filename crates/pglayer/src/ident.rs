//! SQL identifier quoting.
//!
//! Any user-supplied name that lands in identifier position (DDL, column
//! lists, ORDER BY targets built from descriptors) goes through these
//! helpers. Quoting is unconditional: embedded `"` characters are doubled,
//! so the output is always a single valid quoted identifier.

/// Quote a single identifier: `name` → `"name"`, `ha"s` → `"ha""s"`.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quote a possibly schema-qualified identifier.
///
/// Dotted input is split and each part is quoted independently:
/// `public.users` → `"public"."users"`.
pub fn quote_qualified(name: &str) -> String {
    if !name.contains('.') {
        return quote_ident(name);
    }
    let mut out = String::with_capacity(name.len() + 4);
    for (i, part) in name.split('.').enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&quote_ident(part));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_simple() {
        assert_eq!(quote_ident("users"), r#""users""#);
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(quote_ident(r#"ha"s"#), r#""ha""s""#);
        assert_eq!(quote_ident(r#"""#), r#""""""#);
    }

    #[test]
    fn qualified_splits_on_dots() {
        assert_eq!(quote_qualified("public.users"), r#""public"."users""#);
        assert_eq!(quote_qualified("a.b.c"), r#""a"."b"."c""#);
    }

    #[test]
    fn qualified_without_dot_is_single() {
        assert_eq!(quote_qualified("users"), r#""users""#);
    }

    #[test]
    fn never_produces_unquoted_output() {
        for input in ["users", "drop table x", "a.b", r#"x"y"#] {
            let quoted = quote_qualified(input);
            assert!(quoted.starts_with('"'));
            assert!(quoted.ends_with('"'));
        }
    }
}
