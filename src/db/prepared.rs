//! Client-side emulation of prepared statements.
//!
//! Templates use `?` for a quoted value and `!` for a raw value. A backslash
//! escapes a marker so it is emitted literally without consuming an argument.
//! The `&` marker (substitute file contents) is refused.

use crate::db::dialect::{Dialect, value_to_plain};
use crate::error::{DbError, DbResult};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[?!&]|[?!&]").expect("marker pattern compiles"));

/// Substitute positional arguments into `template`.
///
/// Extra arguments are ignored; too few is an error.
pub fn fill_prepared(dialect: &dyn Dialect, template: &str, args: &[JsonValue]) -> DbResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut last = 0;

    for m in MARKER.find_iter(template) {
        out.push_str(&template[last..m.start()]);
        last = m.end();

        match m.as_str() {
            escaped if escaped.starts_with('\\') => out.push_str(&escaped[1..]),
            "&" => {
                return Err(DbError::unsupported(
                    "fill_prepared",
                    "'&' (file content substitution) is not supported",
                ));
            }
            marker => {
                let arg = args.next().ok_or_else(|| {
                    DbError::invalid_input(format!(
                        "not enough arguments for prepared statement: {template}"
                    ))
                })?;
                if marker == "?" {
                    out.push_str(&dialect.quote_literal(arg));
                } else {
                    out.push_str(&value_to_plain(arg));
                }
            }
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}
