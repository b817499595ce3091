//! Caller-facing reads and writes built on [`SqlBuilder`].
//!
//! Every method takes structured values, renders SQL with the client's
//! dialect and table prefix, and runs it through [`Client::query_with`], so
//! the implicit-transaction and error policies apply uniformly.

use crate::db::builder::SqlBuilder;
use crate::db::client::{Client, ErrorPolicy};
use crate::db::driver::Driver;
use crate::db::prepared;
use crate::db::transaction::FlushMode;
use crate::error::{DbError, DbResult};
use crate::models::{
    Conds, LikePart, QueryOptions, Record, ResultHandle, ResultSet, Row, SelectQuery,
};
use serde_json::Value as JsonValue;
use tracing::{debug, error};

impl<D: Driver> Client<D> {
    /// Builder bound to this client's dialect and table naming.
    pub fn builder(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.driver)
            .with_prefix(&self.config.table_prefix)
            .with_shared(self.config.shared.as_ref())
    }

    /// Fully qualified, quoted name of `table`.
    pub fn table_name(&self, table: &str) -> String {
        self.builder().table_name(table)
    }

    pub fn quote(&self, value: &JsonValue) -> String {
        self.driver.quote_literal(value)
    }

    pub fn build_like(&self, parts: &[LikePart]) -> String {
        self.driver.build_like(parts)
    }

    pub fn fill_prepared(&self, template: &str, args: &[JsonValue]) -> DbResult<String> {
        prepared::fill_prepared(&self.driver, template, args)
    }

    /// Substitute `args` into `template` and run the result.
    pub async fn safe_query(
        &mut self,
        template: &str,
        args: &[JsonValue],
        tag: &str,
    ) -> DbResult<ResultHandle> {
        let sql = self.fill_prepared(template, args)?;
        self.query(&sql, tag).await
    }

    /// Run a SELECT. A suppressed failure yields an empty result set.
    pub async fn select(&mut self, query: &SelectQuery, tag: &str) -> DbResult<ResultSet> {
        self.select_with(query, tag, ErrorPolicy::Raise).await
    }

    pub async fn select_with(
        &mut self,
        query: &SelectQuery,
        tag: &str,
        policy: ErrorPolicy,
    ) -> DbResult<ResultSet> {
        let sql = self.builder().select_sql(query)?;
        let handle = self.query_with(&sql, tag, policy).await?;
        Ok(handle.into_result_set().unwrap_or_default())
    }

    /// First row of the query, fetched with `LIMIT 1`.
    pub async fn select_row(&mut self, query: &SelectQuery, tag: &str) -> DbResult<Option<Row>> {
        let limited = SelectQuery {
            options: query.options.clone().limit(1),
            ..query.clone()
        };
        let rs = self.select(&limited, tag).await?;
        Ok(rs.into_iter().next())
    }

    /// First column of the first row.
    pub async fn select_field(
        &mut self,
        query: &SelectQuery,
        tag: &str,
    ) -> DbResult<Option<JsonValue>> {
        let limited = SelectQuery {
            options: query.options.clone().limit(1),
            ..query.clone()
        };
        let rs = self.select(&limited, tag).await?;
        Ok(rs.first_value().cloned())
    }

    /// Number of rows the query would return.
    pub async fn select_row_count(&mut self, query: &SelectQuery, tag: &str) -> DbResult<u64> {
        let sql = self.builder().select_row_count_sql(query)?;
        let rs = self
            .query(&sql, tag)
            .await?
            .into_result_set()
            .unwrap_or_default();

        Ok(match rs.first().and_then(|row| row.get("rowcount")) {
            Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0),
            Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        })
    }

    /// Insert `rows`. Returns false when the statement failed under a
    /// suppressing policy. An empty batch is a no-op.
    pub async fn insert(
        &mut self,
        table: &str,
        rows: &[Record],
        options: &QueryOptions,
        tag: &str,
    ) -> DbResult<bool> {
        if rows.is_empty() {
            return Ok(true);
        }
        let sql = self.builder().insert_sql(table, rows, options)?;
        Ok(!self.query(&sql, tag).await?.is_failed())
    }

    pub async fn update(
        &mut self,
        table: &str,
        set: &Record,
        conds: &Conds,
        options: &QueryOptions,
        tag: &str,
    ) -> DbResult<bool> {
        let sql = self.builder().update_sql(table, set, conds, options)?;
        Ok(!self.query(&sql, tag).await?.is_failed())
    }

    pub async fn delete(&mut self, table: &str, conds: &Conds, tag: &str) -> DbResult<bool> {
        let sql = self.builder().delete_sql(table, conds)?;
        Ok(!self.query(&sql, tag).await?.is_failed())
    }

    /// Copy rows selected by `source` into `dest`.
    pub async fn insert_select(
        &mut self,
        dest: &str,
        columns: &[(&str, &str)],
        source: &SelectQuery,
        insert_options: &QueryOptions,
        tag: &str,
    ) -> DbResult<bool> {
        let sql = self
            .builder()
            .insert_select_sql(dest, columns, source, insert_options)?;
        Ok(!self.query(&sql, tag).await?.is_failed())
    }

    /// Update the rows colliding with `rows` on any unique key, then insert
    /// the rest, skipping duplicates.
    ///
    /// Runs in its own transaction when none is open. Without unique keys
    /// this is a plain insert.
    pub async fn upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        unique_keys: &[&[&str]],
        set: &Record,
        tag: &str,
    ) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if unique_keys.is_empty() {
            debug!(caller = %tag, table, "Upsert without unique keys, inserting");
            self.insert(table, rows, &QueryOptions::new(), tag).await?;
            return Ok(());
        }

        let (update, insert) = {
            let builder = self.builder();
            let collisions = builder.unique_key_conds(rows, unique_keys)?;
            let update = builder.update_sql(
                table,
                set,
                &Conds::new().raw(collisions),
                &QueryOptions::new(),
            )?;
            let insert = builder.insert_sql(table, rows, &QueryOptions::new().ignore())?;
            (update, insert)
        };

        let own_trx = self.trx.is_none();
        if own_trx {
            self.begin(tag).await?;
        }

        let outcome = async {
            self.query(&update, tag).await?;
            self.query(&insert, tag).await?;
            Ok::<(), DbError>(())
        }
        .await;

        match outcome {
            Ok(()) if own_trx => self.commit(tag, FlushMode::Normal).await,
            Ok(()) => Ok(()),
            Err(e) => {
                if own_trx {
                    if let Err(rb) = self.rollback(tag, FlushMode::Normal).await {
                        error!(caller = %tag, error = %rb, "Rollback after failed upsert failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Replace rows colliding on any unique key.
    ///
    /// Engines without native REPLACE get a DELETE then INSERT per row, run
    /// in the caller's transaction context.
    pub async fn replace(
        &mut self,
        table: &str,
        rows: &[Record],
        unique_keys: &[&[&str]],
        tag: &str,
    ) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if self.driver.supports_native_replace() {
            let sql = self.builder().replace_sql(table, rows)?;
            self.query(&sql, tag).await?;
            return Ok(());
        }
        if unique_keys.is_empty() {
            self.insert(table, rows, &QueryOptions::new(), tag).await?;
            return Ok(());
        }

        for row in rows {
            let (delete, insert) = {
                let builder = self.builder();
                let collisions =
                    builder.unique_key_conds(std::slice::from_ref(row), unique_keys)?;
                let delete = builder.delete_sql(table, &Conds::new().raw(collisions))?;
                let insert =
                    builder.insert_sql(table, std::slice::from_ref(row), &QueryOptions::new())?;
                (delete, insert)
            };
            self.query(&delete, tag).await?;
            self.query(&insert, tag).await?;
        }
        Ok(())
    }

    /// Whether `table` exists, checked with a statement whose failure is
    /// suppressed.
    pub async fn table_exists(&mut self, table: &str, tag: &str) -> DbResult<bool> {
        let sql = {
            let name = self.table_name(table);
            self.driver.table_exists_query(&name)
        };
        let handle = self.query_with(&sql, tag, ErrorPolicy::Suppress).await?;
        Ok(!handle.is_failed())
    }
}
