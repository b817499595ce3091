//! Query-related data models.
//!
//! Engine-neutral structured inputs handed to the query builder (tables,
//! fields, conditions, options, rows) and the result values handed back.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// A table reference, optionally aliased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub alias: Option<String>,
    pub name: String,
}

impl TableRef {
    /// The name the table is addressed by inside the query.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Tables a SELECT reads from, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables(Vec<TableRef>);

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unaliased table.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.0.push(TableRef {
            alias: None,
            name: name.into(),
        });
        self
    }

    /// Add a table under an alias.
    pub fn aliased(mut self, alias: impl Into<String>, name: impl Into<String>) -> Self {
        self.0.push(TableRef {
            alias: Some(alias.into()),
            name: name.into(),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableRef> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Tables {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            Self::new()
        } else {
            Self::new().table(name)
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Tables {
    /// `alias => table name` pairs.
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |tables, (alias, name)| tables.aliased(alias, name))
    }
}

/// A selected expression, optionally aliased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub expr: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<FieldRef>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, expr: impl Into<String>) -> Self {
        self.0.push(FieldRef {
            expr: expr.into(),
            alias: None,
        });
        self
    }

    /// Add `expr AS alias`.
    pub fn aliased(mut self, alias: impl Into<String>, expr: impl Into<String>) -> Self {
        self.0.push(FieldRef {
            expr: expr.into(),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRef> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Fields {
    fn from(expr: &str) -> Self {
        Self::new().field(expr)
    }
}

impl<const N: usize> From<[&str; N]> for Fields {
    fn from(exprs: [&str; N]) -> Self {
        exprs.into_iter().fold(Self::new(), Fields::field)
    }
}

impl From<Vec<&str>> for Fields {
    fn from(exprs: Vec<&str>) -> Self {
        exprs.into_iter().fold(Self::new(), Fields::field)
    }
}

/// One condition of a WHERE/ON/HAVING list.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// SQL fragment inserted verbatim (parenthesized).
    Raw(String),
    /// `field = value`, `field IS NULL` for null, `field IN (...)` for arrays.
    Field { name: String, value: JsonValue },
}

/// Conditions combined with AND (or OR where the builder says so).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conds {
    items: Vec<Cond>,
    all: bool,
}

impl Conds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match every row. Required to DELETE or UPDATE a whole table.
    pub fn all() -> Self {
        Self {
            items: Vec::new(),
            all: true,
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.items.push(Cond::Field {
            name: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        let values: Vec<JsonValue> = values.into_iter().map(Into::into).collect();
        self.eq(field, JsonValue::Array(values))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.eq(field, JsonValue::Null)
    }

    pub fn raw(mut self, sql: impl Into<String>) -> Self {
        self.items.push(Cond::Raw(sql.into()));
        self
    }

    pub fn push(&mut self, cond: Cond) {
        self.items.push(cond);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cond> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No conditions and not explicitly matching all rows.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && !self.all
    }

    pub fn matches_all(&self) -> bool {
        self.all && self.items.is_empty()
    }
}

impl From<&str> for Conds {
    fn from(sql: &str) -> Self {
        match sql.trim() {
            "" => Self::new(),
            "*" => Self::all(),
            raw => Self::new().raw(raw),
        }
    }
}

/// How an aliased table joins the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// e.g. `LEFT JOIN`, `INNER JOIN`
    pub kind: String,
    pub on: Conds,
}

/// Join conditions keyed by table alias.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinConds(Vec<(String, Join)>);

impl JoinConds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(
        mut self,
        alias: impl Into<String>,
        kind: impl Into<String>,
        on: impl Into<Conds>,
    ) -> Self {
        self.0.push((
            alias.into(),
            Join {
                kind: kind.into(),
                on: on.into(),
            },
        ));
        self
    }

    pub fn get(&self, alias: &str) -> Option<&Join> {
        self.0.iter().find(|(a, _)| a == alias).map(|(_, j)| j)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered option bag for SELECT/INSERT/UPDATE modifiers.
///
/// Flags (`DISTINCT`, `FOR UPDATE`, `IGNORE`, ...) carry no value; keyed
/// options (`LIMIT`, `ORDER BY`, `USE INDEX`, ...) do. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    entries: Vec<(String, Option<JsonValue>)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, name: &str) -> Self {
        self.entries.push((name.to_ascii_uppercase(), None));
        self
    }

    pub fn set(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.entries
            .push((name.to_ascii_uppercase(), Some(value.into())));
        self
    }

    pub fn limit(self, limit: u64) -> Self {
        self.set("LIMIT", limit)
    }

    pub fn offset(self, offset: u64) -> Self {
        self.set("OFFSET", offset)
    }

    /// A single expression or an array of expressions.
    pub fn order_by(self, order: impl Into<JsonValue>) -> Self {
        self.set("ORDER BY", order)
    }

    pub fn group_by(self, group: impl Into<JsonValue>) -> Self {
        self.set("GROUP BY", group)
    }

    pub fn having(self, having: impl Into<JsonValue>) -> Self {
        self.set("HAVING", having)
    }

    /// An index name for the whole query, or an object mapping alias to index.
    pub fn use_index(self, index: impl Into<JsonValue>) -> Self {
        self.set("USE INDEX", index)
    }

    pub fn distinct(self) -> Self {
        self.flag("DISTINCT")
    }

    pub fn for_update(self) -> Self {
        self.flag("FOR UPDATE")
    }

    pub fn ignore(self) -> Self {
        self.flag("IGNORE")
    }

    pub fn explain(self) -> Self {
        self.flag("EXPLAIN")
    }

    /// Value of a keyed option; the last one set wins.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.entries
            .iter()
            .rev()
            .find(|(key, value)| value.is_some() && key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(key, value)| value.is_none() && key.eq_ignore_ascii_case(name))
    }

    /// All flags in insertion order.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.as_str())
    }
}

/// Column values for one row to write, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record(Vec<(String, JsonValue)>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an earlier value for the same column.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        Self(row.into_iter().collect())
    }
}

impl TryFrom<JsonValue> for Record {
    type Error = crate::error::DbError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(map) => Ok(map.into()),
            other => Err(crate::error::DbError::invalid_input(format!(
                "expected an object of column values, got {other}"
            ))),
        }
    }
}

/// Everything needed to build one SELECT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub tables: Tables,
    pub fields: Fields,
    pub conds: Conds,
    pub options: QueryOptions,
    pub joins: JoinConds,
}

impl SelectQuery {
    pub fn new(tables: impl Into<Tables>) -> Self {
        Self {
            tables: tables.into(),
            fields: Fields::from("*"),
            ..Self::default()
        }
    }

    pub fn fields(mut self, fields: impl Into<Fields>) -> Self {
        self.fields = fields.into();
        self
    }

    pub fn conds(mut self, conds: impl Into<Conds>) -> Self {
        self.conds = conds.into();
        self
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn joins(mut self, joins: JoinConds) -> Self {
        self.joins = joins;
        self
    }
}

/// Pieces of a LIKE pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikePart {
    /// Matched literally; wildcard characters are escaped.
    Literal(String),
    /// `%`
    AnyString,
    /// `_`
    AnyChar,
}

/// Tabular result of a read statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Value of the first column of the first row.
    pub fn first_value(&self) -> Option<&JsonValue> {
        let column = self.columns.first()?;
        self.rows.first()?.get(column)
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultHandle {
    /// A write (or any statement without a row set) succeeded.
    Write {
        affected_rows: u64,
        last_insert_id: Option<i64>,
    },
    /// A read returned rows.
    Rows(ResultSet),
    /// The statement failed and the error was suppressed by policy.
    Failed,
}

impl ResultHandle {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn affected_rows(&self) -> u64 {
        match self {
            Self::Write { affected_rows, .. } => *affected_rows,
            _ => 0,
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Self::Rows(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            Self::Rows(rs) => Some(rs),
            _ => None,
        }
    }
}
