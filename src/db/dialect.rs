//! SQL dialect hooks.
//!
//! Everything the query builder needs to know about an engine's SQL flavor
//! lives behind [`Dialect`]. The defaults render ANSI-ish SQL; each driver
//! overrides what its engine does differently.

use crate::error::{DbError, DbResult};
use crate::models::LikePart;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

static READ_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:SELECT|BEGIN|ROLLBACK|COMMIT|SET|SHOW|EXPLAIN|\(SELECT)\b")
        .expect("read query pattern compiles")
});

static TRANSACTION_CONTROL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:BEGIN|COMMIT|ROLLBACK|START\s+TRANSACTION|SAVEPOINT|RELEASE|END)\b")
        .expect("transaction control pattern compiles")
});

static ROW_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:SELECT|SHOW|EXPLAIN|DESCRIBE|DESC|WITH|PRAGMA|VALUES|\(SELECT)\b|\bRETURNING\b",
    )
    .expect("row statement pattern compiles")
});

/// Whether `sql` yields a result set even when it matches no rows.
pub fn returns_rows(sql: &str) -> bool {
    ROW_STATEMENT.is_match(sql)
}

/// Whether `sql` opens, closes or marks a transaction.
pub fn is_transaction_control(sql: &str) -> bool {
    TRANSACTION_CONTROL.is_match(sql)
}

/// Render a JSON scalar without quotes, as used for numbers and raw values.
pub fn value_to_plain(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(true) => "1".to_string(),
        JsonValue::Bool(false) => "0".to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub trait Dialect {
    /// Quote an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn is_quoted_identifier(&self, name: &str) -> bool {
        name.len() >= 2 && name.starts_with('"') && name.ends_with('"')
    }

    /// Escape a string for use inside single quotes.
    fn escape_string(&self, s: &str) -> String {
        s.replace('\\', "\\\\").replace('\'', "\\'")
    }

    /// Quote a value as an SQL literal. Null renders as the `NULL` token.
    fn quote_literal(&self, value: &JsonValue) -> String {
        match value {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Array(_) | JsonValue::Object(_) => {
                format!("'{}'", self.escape_string(&value.to_string()))
            }
            scalar => format!("'{}'", self.escape_string(&value_to_plain(scalar))),
        }
    }

    /// Escape LIKE wildcards so `s` matches literally.
    fn escape_like_pattern(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            if matches!(c, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    /// ` LIKE '<pattern>' ` for the given parts.
    fn build_like(&self, parts: &[LikePart]) -> String {
        let pattern: String = parts
            .iter()
            .map(|part| match part {
                LikePart::Literal(s) => self.escape_like_pattern(s),
                LikePart::AnyString => "%".to_string(),
                LikePart::AnyChar => "_".to_string(),
            })
            .collect();
        format!(
            " LIKE '{}'{} ",
            self.escape_string(&pattern),
            self.like_escape_suffix()
        )
    }

    /// Appended to LIKE when the engine has no default escape character,
    /// e.g. ` ESCAPE '\'`.
    fn like_escape_suffix(&self) -> &'static str {
        ""
    }

    fn limit_clause(&self, limit: u64, offset: u64) -> String {
        if offset > 0 {
            format!("LIMIT {limit} OFFSET {offset}")
        } else {
            format!("LIMIT {limit}")
        }
    }

    /// Index hint placed after a table reference.
    fn use_index_clause(&self, _index: &str) -> String {
        String::new()
    }

    /// Keyword placed after INSERT to skip duplicate rows.
    fn ignore_keyword(&self) -> Option<&'static str> {
        None
    }

    /// Suffix placed after an INSERT to skip duplicate rows.
    fn insert_ignore_suffix(&self) -> &'static str {
        ""
    }

    /// Whether the engine has `REPLACE INTO`.
    fn supports_native_replace(&self) -> bool {
        false
    }

    /// SELECT modifier for a vendor boolean option, if the engine knows it.
    fn vendor_select_hint(&self, _flag: &str) -> Option<&'static str> {
        None
    }

    /// Trailing locking clause for `FOR UPDATE` / `LOCK IN SHARE MODE`.
    fn lock_clause(&self, flag: &str) -> Option<&'static str> {
        match flag {
            "FOR UPDATE" => Some("FOR UPDATE"),
            "LOCK IN SHARE MODE" => Some("LOCK IN SHARE MODE"),
            _ => None,
        }
    }

    /// Whether `sql` may modify data. Anything not starting with a read or
    /// session keyword counts as a write.
    fn is_write_query(&self, sql: &str) -> bool {
        !READ_QUERY.is_match(sql)
    }

    /// Query listing a table by name, used by `table_exists`.
    fn table_exists_query(&self, quoted_table: &str) -> String {
        format!("SELECT 1 FROM {quoted_table} WHERE 1=0")
    }
}

/// Dialect with every default, for engines without special needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {}

/// Parse a LIMIT/OFFSET option: a number or a numeric string.
pub fn parse_count(option: &str, value: &JsonValue) -> DbResult<u64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DbError::invalid_input(format!("{option} must be numeric, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_identifier_doubles_quotes() {
        let d = GenericDialect;
        assert_eq!(d.quote_identifier("page"), "\"page\"");
        assert_eq!(d.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert!(d.is_quoted_identifier("\"page\""));
        assert!(!d.is_quoted_identifier("page"));
    }

    #[test]
    fn test_quote_literal() {
        let d = GenericDialect;
        assert_eq!(d.quote_literal(&JsonValue::Null), "NULL");
        assert_eq!(d.quote_literal(&json!(5)), "'5'");
        assert_eq!(d.quote_literal(&json!(true)), "'1'");
        assert_eq!(d.quote_literal(&json!("O'Reilly")), "'O\\'Reilly'");
        assert_eq!(d.quote_literal(&json!("a\\b")), "'a\\\\b'");
    }

    #[test]
    fn test_escape_like_pattern() {
        let d = GenericDialect;
        assert_eq!(d.escape_like_pattern("50%_off"), "50\\%\\_off");
        let like = d.build_like(&[
            LikePart::Literal("Foo_".to_string()),
            LikePart::AnyString,
        ]);
        assert_eq!(like, " LIKE 'Foo\\\\_%' ");
    }

    #[test]
    fn test_is_write_query() {
        let d = GenericDialect;
        assert!(!d.is_write_query("SELECT 1"));
        assert!(!d.is_write_query("  select * from t"));
        assert!(!d.is_write_query("(SELECT 1) UNION (SELECT 2)"));
        assert!(!d.is_write_query("SHOW TABLES"));
        assert!(!d.is_write_query("BEGIN"));
        assert!(d.is_write_query("INSERT INTO t VALUES (1)"));
        assert!(d.is_write_query("UPDATE t SET a = 1"));
        assert!(d.is_write_query("CREATE TABLE t (a INT)"));
        assert!(d.is_write_query("SELECTIVE_UPDATE()"));
    }

    #[test]
    fn test_is_transaction_control() {
        assert!(is_transaction_control("BEGIN"));
        assert!(is_transaction_control("start transaction"));
        assert!(is_transaction_control("ROLLBACK TO SAVEPOINT a"));
        assert!(!is_transaction_control("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("select 1"));
        assert!(returns_rows("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(returns_rows("PRAGMA table_info(page)"));
        assert!(returns_rows("DESCRIBE page"));
        assert!(returns_rows("UPDATE t SET a = 1 RETURNING id"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("BEGIN"));
        assert!(!returns_rows("DESCRIPTIONS"));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("LIMIT", &json!(10)).unwrap(), 10);
        assert_eq!(parse_count("LIMIT", &json!("10")).unwrap(), 10);
        assert!(matches!(
            parse_count("LIMIT", &json!("ten")),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(parse_count("LIMIT", &json!(-1)).is_err());
    }
}
