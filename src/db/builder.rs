//! SQL text generation from structured inputs.
//!
//! [`SqlBuilder`] renders SELECT/INSERT/UPDATE/DELETE/REPLACE statements and
//! their fragments (condition lists, table clauses, option modifiers). It
//! never executes anything; engine differences come from the [`Dialect`].

use crate::config::SharedTables;
use crate::db::dialect::{Dialect, parse_count, value_to_plain};
use crate::error::{DbError, DbResult};
use crate::models::{Cond, Conds, Fields, JoinConds, QueryOptions, Record, SelectQuery, Tables};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

/// Table expressions that already contain SQL and must not be quoted.
static SQL_TABLE_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\s)(DISTINCT|JOIN|ON|AS)(\s|$)").expect("table expression pattern compiles")
});

/// How the items of a list are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// `a = 1, b = 2`
    Comma,
    /// `a = 1 AND (raw)`
    And,
    /// `a = 1 OR (raw)`
    Or,
    /// SET clause: `a = 1, b = NULL`
    Set,
    /// Bare names: `a, b`
    Names,
}

impl ListMode {
    fn separator(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
            Self::Comma | Self::Set | Self::Names => ", ",
        }
    }
}

pub struct SqlBuilder<'a> {
    dialect: &'a dyn Dialect,
    table_prefix: &'a str,
    shared: Option<&'a SharedTables>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            table_prefix: "",
            shared: None,
        }
    }

    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = prefix;
        self
    }

    pub fn with_shared(mut self, shared: Option<&'a SharedTables>) -> Self {
        self.shared = shared;
        self
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    fn quote_part(&self, part: &str) -> String {
        if self.dialect.is_quoted_identifier(part) {
            part.to_string()
        } else {
            self.dialect.quote_identifier(part)
        }
    }

    /// Full, quoted name of a table.
    ///
    /// Already-quoted names and SQL expressions pass through unchanged.
    /// `db.table` is taken literally. Shared tables are routed to the shared
    /// database; every other table gets the table prefix.
    pub fn table_name(&self, name: &str) -> String {
        if self.dialect.is_quoted_identifier(name) || SQL_TABLE_EXPR.is_match(name) {
            return name.to_string();
        }

        if name.contains('.') {
            return name
                .split('.')
                .map(|part| self.quote_part(part))
                .collect::<Vec<_>>()
                .join(".");
        }

        match self.shared {
            Some(shared) if shared.contains(name) => {
                let prefix = shared.prefix.as_deref().unwrap_or(self.table_prefix);
                format!(
                    "{}.{}",
                    self.quote_part(&shared.database),
                    self.dialect.quote_identifier(&format!("{prefix}{name}"))
                )
            }
            _ => self
                .dialect
                .quote_identifier(&format!("{}{}", self.table_prefix, name)),
        }
    }

    /// `table alias`, or just the table when the alias adds nothing.
    pub fn table_name_with_alias(&self, name: &str, alias: Option<&str>) -> String {
        let table = self.table_name(name);
        match alias {
            Some(alias) if alias != name => {
                format!("{} {}", table, self.dialect.quote_identifier(alias))
            }
            _ => table,
        }
    }

    /// `expr AS alias`, or just the expression when the alias adds nothing.
    pub fn field_with_alias(&self, expr: &str, alias: Option<&str>) -> String {
        match alias {
            Some(alias) if alias != expr => format!("{expr} AS {alias}"),
            _ => expr.to_string(),
        }
    }

    fn fields_clause(&self, fields: &Fields) -> DbResult<String> {
        if fields.is_empty() {
            return Err(DbError::invalid_input("no fields to select"));
        }
        Ok(fields
            .iter()
            .map(|f| self.field_with_alias(&f.expr, f.alias.as_deref()))
            .collect::<Vec<_>>()
            .join(","))
    }

    fn field_condition(&self, name: &str, value: &JsonValue, mode: ListMode) -> DbResult<String> {
        match (mode, value) {
            (ListMode::Names, _) => Ok(name.to_string()),
            (ListMode::Set, v) => Ok(format!("{name} = {}", self.dialect.quote_literal(v))),
            (_, JsonValue::Null) => Ok(format!("{name} IS NULL")),
            (_, JsonValue::Array(values)) => self.in_condition(name, values),
            (_, v) => Ok(format!("{name} = {}", self.dialect.quote_literal(v))),
        }
    }

    fn in_condition(&self, name: &str, values: &[JsonValue]) -> DbResult<String> {
        if values.is_empty() {
            return Err(DbError::invalid_input(format!(
                "empty value list given for field '{name}'"
            )));
        }

        let has_null = values.iter().any(JsonValue::is_null);
        let non_null: Vec<&JsonValue> = values.iter().filter(|v| !v.is_null()).collect();

        let list = match non_null.as_slice() {
            [] => None,
            [single] => Some(format!("{name} = {}", self.dialect.quote_literal(single))),
            many => Some(format!(
                "{name} IN ({})",
                many.iter()
                    .map(|v| self.dialect.quote_literal(v))
                    .collect::<Vec<_>>()
                    .join(",")
            )),
        };

        Ok(match (list, has_null) {
            (Some(list), false) => list,
            (Some(list), true) => format!("({list} OR {name} IS NULL)"),
            (None, _) => format!("{name} IS NULL"),
        })
    }

    /// Render conditions as a list joined according to `mode`.
    ///
    /// Raw fragments are parenthesized under AND/OR. A list value becomes
    /// `=` for one element and `IN (...)` for several; null becomes `IS NULL`.
    pub fn make_list(&self, conds: &Conds, mode: ListMode) -> DbResult<String> {
        let items = conds
            .iter()
            .map(|cond| match cond {
                Cond::Raw(sql) if matches!(mode, ListMode::And | ListMode::Or) => {
                    Ok(format!("({sql})"))
                }
                Cond::Raw(sql) => Ok(sql.clone()),
                Cond::Field { name, value } => self.field_condition(name, value, mode),
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(items.join(mode.separator()))
    }

    /// `a = 'x', b = NULL` for a row of values.
    pub fn make_set(&self, record: &Record) -> String {
        record
            .iter()
            .map(|(col, v)| format!("{col} = {}", self.dialect.quote_literal(v)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn where_clause(&self, conds: &Conds) -> DbResult<String> {
        if conds.matches_all() || conds.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("WHERE {}", self.make_list(conds, ListMode::And)?))
    }

    /// FROM clause body: implicit joins comma-separated, explicit joins after them.
    pub fn tables_clause(
        &self,
        tables: &Tables,
        use_index: Option<&serde_json::Map<String, JsonValue>>,
        joins: &JoinConds,
    ) -> DbResult<String> {
        let mut implicit = Vec::new();
        let mut explicit = Vec::new();

        for table in tables.iter() {
            let mut rendered = self.table_name_with_alias(&table.name, table.alias.as_deref());
            if let Some(index) = use_index.and_then(|m| m.get(table.key())) {
                let hint = self.dialect.use_index_clause(&value_to_plain(index));
                if !hint.is_empty() {
                    rendered = format!("{rendered} {hint}");
                }
            }

            match joins.get(table.key()) {
                Some(join) => {
                    let on = self.make_list(&join.on, ListMode::And)?;
                    if on.is_empty() {
                        explicit.push(format!("{} {}", join.kind, rendered));
                    } else {
                        explicit.push(format!("{} {} ON ({})", join.kind, rendered, on));
                    }
                }
                None => implicit.push(rendered),
            }
        }

        let implicit = implicit.join(",");
        let explicit = explicit.join(" ");
        Ok(match (implicit.is_empty(), explicit.is_empty()) {
            (_, true) => implicit,
            (true, false) => explicit,
            (false, false) => format!("{implicit} {explicit}"),
        })
    }

    /// Render an option value that may be one expression or a list of them.
    fn option_list(value: &JsonValue) -> String {
        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(value_to_plain)
                .collect::<Vec<_>>()
                .join(","),
            other => value_to_plain(other),
        }
    }

    /// `LIMIT` clause from the options, if a limit was given.
    fn limit_from_options(&self, options: &QueryOptions) -> DbResult<String> {
        let Some(limit) = options.get("LIMIT") else {
            return Ok(String::new());
        };
        let limit = parse_count("LIMIT", limit)?;
        let offset = options
            .get("OFFSET")
            .and_then(|v| parse_count("OFFSET", v).ok())
            .unwrap_or(0);
        Ok(self.dialect.limit_clause(limit, offset))
    }

    /// Modifiers placed right after SELECT.
    fn start_options(&self, options: &QueryOptions) -> String {
        let mut start = Vec::new();
        if options.has_flag("DISTINCT") || options.has_flag("DISTINCTROW") {
            start.push("DISTINCT");
        }
        start.extend(
            options
                .flags()
                .filter_map(|flag| self.dialect.vendor_select_hint(flag)),
        );
        start.join(" ")
    }

    /// GROUP BY, HAVING and ORDER BY, in that order.
    fn grouping_options(&self, options: &QueryOptions) -> DbResult<Vec<String>> {
        let mut parts = Vec::new();
        if let Some(group) = options.get("GROUP BY") {
            parts.push(format!("GROUP BY {}", Self::option_list(group)));
        }
        if let Some(having) = options.get("HAVING") {
            let having = match having {
                JsonValue::Array(items) => {
                    let conds = items.iter().fold(Conds::new(), |c, item| {
                        c.raw(value_to_plain(item))
                    });
                    self.make_list(&conds, ListMode::And)?
                }
                other => value_to_plain(other),
            };
            parts.push(format!("HAVING {having}"));
        }
        if let Some(order) = options.get("ORDER BY") {
            parts.push(format!("ORDER BY {}", Self::option_list(order)));
        }
        Ok(parts)
    }

    fn lock_options(&self, options: &QueryOptions) -> String {
        ["FOR UPDATE", "LOCK IN SHARE MODE"]
            .into_iter()
            .filter(|flag| options.has_flag(flag))
            .filter_map(|flag| self.dialect.lock_clause(flag))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a SELECT statement.
    ///
    /// Pieces are assembled in a fixed order: start modifiers, fields, FROM,
    /// index hint, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT, locking clause.
    pub fn select_sql(&self, query: &SelectQuery) -> DbResult<String> {
        let options = &query.options;
        let (global_index, per_table_index) = match options.get("USE INDEX") {
            Some(JsonValue::Object(map)) => (None, Some(map)),
            Some(index) => (Some(value_to_plain(index)), None),
            None => (None, None),
        };

        let mut parts: Vec<String> = Vec::new();
        if options.has_flag("EXPLAIN") {
            parts.push("EXPLAIN".to_string());
        }
        parts.push("SELECT".to_string());
        parts.push(self.start_options(options));
        parts.push(self.fields_clause(&query.fields)?);

        if !query.tables.is_empty() {
            parts.push("FROM".to_string());
            parts.push(self.tables_clause(&query.tables, per_table_index, &query.joins)?);
            if let Some(index) = global_index {
                parts.push(self.dialect.use_index_clause(&index));
            }
        }

        parts.push(self.where_clause(&query.conds)?);
        parts.extend(self.grouping_options(options)?);
        parts.push(self.limit_from_options(options)?);
        parts.push(self.lock_options(options));

        Ok(parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// `SELECT COUNT(*)` over the rows a select would return.
    pub fn select_row_count_sql(&self, query: &SelectQuery) -> DbResult<String> {
        let inner = SelectQuery {
            fields: Fields::from("1"),
            ..query.clone()
        };
        Ok(format!(
            "SELECT COUNT(*) AS rowcount FROM ({}) tmp_count",
            self.select_sql(&inner)?
        ))
    }

    fn insert_head(&self, options: &QueryOptions) -> String {
        match (options.has_flag("IGNORE"), self.dialect.ignore_keyword()) {
            (true, Some(keyword)) => format!("INSERT {keyword} INTO"),
            _ => "INSERT INTO".to_string(),
        }
    }

    fn insert_tail(&self, options: &QueryOptions) -> &'static str {
        if options.has_flag("IGNORE") {
            self.dialect.insert_ignore_suffix()
        } else {
            ""
        }
    }

    /// `(a,b) VALUES ('1','2'),('3','4')`; every row must name the same columns.
    fn values_clause(&self, rows: &[Record]) -> DbResult<String> {
        let first = rows
            .first()
            .ok_or_else(|| DbError::invalid_input("no rows to write"))?;
        let columns: Vec<&str> = first.columns().collect();
        if columns.is_empty() {
            return Err(DbError::invalid_input("row has no columns"));
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() || columns.iter().any(|c| row.get(c).is_none()) {
                return Err(DbError::invalid_input(
                    "all rows must set the same columns",
                ));
            }
            let values: Vec<String> = columns
                .iter()
                .filter_map(|c| row.get(c))
                .map(|v| self.dialect.quote_literal(v))
                .collect();
            tuples.push(format!("({})", values.join(",")));
        }

        Ok(format!("({}) VALUES {}", columns.join(","), tuples.join(",")))
    }

    pub fn insert_sql(
        &self,
        table: &str,
        rows: &[Record],
        options: &QueryOptions,
    ) -> DbResult<String> {
        Ok(format!(
            "{} {} {}{}",
            self.insert_head(options),
            self.table_name(table),
            self.values_clause(rows)?,
            self.insert_tail(options)
        ))
    }

    /// Native `REPLACE INTO`; only valid when the dialect supports it.
    pub fn replace_sql(&self, table: &str, rows: &[Record]) -> DbResult<String> {
        if !self.dialect.supports_native_replace() {
            return Err(DbError::unsupported(
                "REPLACE",
                "engine has no native REPLACE statement",
            ));
        }
        Ok(format!(
            "REPLACE INTO {} {}",
            self.table_name(table),
            self.values_clause(rows)?
        ))
    }

    pub fn update_sql(
        &self,
        table: &str,
        set: &Record,
        conds: &Conds,
        options: &QueryOptions,
    ) -> DbResult<String> {
        if set.is_empty() {
            return Err(DbError::invalid_input("UPDATE without values to set"));
        }
        if conds.is_empty() {
            return Err(DbError::invalid_input(
                "UPDATE without conditions; use Conds::all() to update every row",
            ));
        }
        let head = match (options.has_flag("IGNORE"), self.dialect.ignore_keyword()) {
            (true, Some(keyword)) => format!("UPDATE {keyword}"),
            _ => "UPDATE".to_string(),
        };
        let sql = format!("{} {} SET {}", head, self.table_name(table), self.make_set(set));
        let where_clause = self.where_clause(conds)?;
        Ok(if where_clause.is_empty() {
            sql
        } else {
            format!("{sql} {where_clause}")
        })
    }

    pub fn delete_sql(&self, table: &str, conds: &Conds) -> DbResult<String> {
        if conds.is_empty() {
            return Err(DbError::invalid_input(
                "DELETE without conditions; use Conds::all() to delete every row",
            ));
        }
        let sql = format!("DELETE FROM {}", self.table_name(table));
        let where_clause = self.where_clause(conds)?;
        Ok(if where_clause.is_empty() {
            sql
        } else {
            format!("{sql} {where_clause}")
        })
    }

    /// `INSERT INTO dest (cols) SELECT exprs FROM ...`.
    ///
    /// `columns` maps destination columns to source expressions.
    pub fn insert_select_sql(
        &self,
        dest: &str,
        columns: &[(&str, &str)],
        source: &SelectQuery,
        insert_options: &QueryOptions,
    ) -> DbResult<String> {
        if columns.is_empty() {
            return Err(DbError::invalid_input("INSERT ... SELECT without columns"));
        }
        let dest_cols: Vec<&str> = columns.iter().map(|(d, _)| *d).collect();
        let select = SelectQuery {
            fields: columns
                .iter()
                .fold(Fields::new(), |fields, (_, expr)| fields.field(*expr)),
            ..source.clone()
        };
        Ok(format!(
            "{} {} ({}) {}{}",
            self.insert_head(insert_options),
            self.table_name(dest),
            dest_cols.join(","),
            self.select_sql(&select)?,
            self.insert_tail(insert_options)
        ))
    }

    /// OR over every row and unique index of the AND of that index's columns.
    ///
    /// Selects the existing rows an upsert or replace collides with.
    pub fn unique_key_conds(&self, rows: &[Record], unique_keys: &[&[&str]]) -> DbResult<String> {
        let mut clauses = Vec::new();
        for row in rows {
            for key in unique_keys {
                let mut conds = Conds::new();
                for column in key.iter() {
                    let value = row.get(column).ok_or_else(|| {
                        DbError::invalid_input(format!(
                            "row is missing unique key column '{column}'"
                        ))
                    })?;
                    conds = conds.eq(*column, value.clone());
                }
                clauses.push(format!("({})", self.make_list(&conds, ListMode::And)?));
            }
        }
        Ok(clauses.join(" OR "))
    }
}
