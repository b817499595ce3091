use super::{driver_error, statement_outcome};
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverError};
use crate::models::{ResultHandle, ServerConfig};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Either, Executor};
use std::str::FromStr;
use tracing::debug;

const SQLITE_BUSY: i64 = 5;
const SQLITE_SCHEMA: i64 = 17;

/// Primary result code of an (extended) SQLite error code.
fn primary_code(err: &DriverError) -> Option<i64> {
    err.code.parse::<i64>().ok().map(|code| code & 0xff)
}

#[derive(Default)]
pub struct SqliteDriver {
    conn: Option<SqliteConnection>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for SqliteDriver {
    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn like_escape_suffix(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    fn ignore_keyword(&self) -> Option<&'static str> {
        Some("OR IGNORE")
    }

    fn supports_native_replace(&self) -> bool {
        true
    }

    // SQLite locks the whole database; row locking clauses do not parse.
    fn lock_clause(&self, _flag: &str) -> Option<&'static str> {
        None
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&mut self, server: &ServerConfig) -> Result<(), DriverError> {
        if let Some(old) = self.conn.take() {
            let _ = old.close().await;
        }

        let options = if server.database == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(driver_error)?
        } else {
            SqliteConnectOptions::new()
                .filename(&server.database)
                .create_if_missing(true)
        };

        debug!(database = %server.database, "Opening SQLite connection");
        self.conn = Some(options.connect().await.map_err(driver_error)?);
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<ResultHandle, DriverError> {
        let conn = self.conn.as_mut().ok_or_else(DriverError::not_connected)?;

        let mut results = conn.fetch_many(sql);
        let mut rows = Vec::new();
        let mut affected_rows = 0;
        let mut last_insert_id = None;
        while let Some(step) = results.try_next().await.map_err(driver_error)? {
            match step {
                Either::Left(done) => {
                    affected_rows += done.rows_affected();
                    last_insert_id = Some(done.last_insert_rowid());
                }
                Either::Right(row) => rows.push(row),
            }
        }

        Ok(statement_outcome(sql, &rows, affected_rows, last_insert_id))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(driver_error),
            None => Ok(()),
        }
    }

    fn is_lost_connection(&self, err: &DriverError) -> bool {
        primary_code(err) == Some(SQLITE_SCHEMA)
    }

    fn is_deadlock(&self, err: &DriverError) -> bool {
        primary_code(err) == Some(SQLITE_BUSY)
    }

    fn engine_name(&self) -> &'static str {
        "sqlite"
    }
}
