use super::{driver_error, statement_outcome};
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverError};
use crate::models::{ResultHandle, ServerConfig};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{ConnectOptions, Connection, Either, Executor};
use tracing::debug;

const ER_LOCK_DEADLOCK: &str = "1213";
/// CR_SERVER_GONE_ERROR, CR_SERVER_LOST
const LOST_CONNECTION_CODES: &[&str] = &["2006", "2013"];

/// MySQL reports the SQLSTATE through the generic error code; the client
/// error number is what classification needs.
fn mysql_error(err: sqlx::Error) -> DriverError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(my_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
            return DriverError::new(my_err.number().to_string(), my_err.message());
        }
    }
    driver_error(err)
}

#[derive(Default)]
pub struct MySqlDriver {
    conn: Option<MySqlConnection>,
}

impl MySqlDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for MySqlDriver {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn is_quoted_identifier(&self, name: &str) -> bool {
        name.len() >= 2 && name.starts_with('`') && name.ends_with('`')
    }

    fn limit_clause(&self, limit: u64, offset: u64) -> String {
        if offset > 0 {
            format!("LIMIT {offset},{limit}")
        } else {
            format!("LIMIT {limit}")
        }
    }

    fn use_index_clause(&self, index: &str) -> String {
        format!("FORCE INDEX ({})", self.quote_identifier(index))
    }

    fn ignore_keyword(&self) -> Option<&'static str> {
        Some("IGNORE")
    }

    fn supports_native_replace(&self) -> bool {
        true
    }

    fn vendor_select_hint(&self, flag: &str) -> Option<&'static str> {
        match flag {
            "STRAIGHT_JOIN" => Some("STRAIGHT_JOIN"),
            "HIGH_PRIORITY" => Some("HIGH_PRIORITY"),
            "SQL_BIG_RESULT" => Some("SQL_BIG_RESULT"),
            "SQL_BUFFER_RESULT" => Some("SQL_BUFFER_RESULT"),
            "SQL_SMALL_RESULT" => Some("SQL_SMALL_RESULT"),
            "SQL_CALC_FOUND_ROWS" => Some("SQL_CALC_FOUND_ROWS"),
            "SQL_CACHE" => Some("SQL_CACHE"),
            "SQL_NO_CACHE" => Some("SQL_NO_CACHE"),
            _ => None,
        }
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&mut self, server: &ServerConfig) -> Result<(), DriverError> {
        if let Some(old) = self.conn.take() {
            let _ = old.close().await;
        }

        let mut options = MySqlConnectOptions::new()
            .host(&server.host)
            .username(&server.user)
            .password(&server.password)
            .database(&server.database);
        if let Some(port) = server.port {
            options = options.port(port);
        }

        debug!(host = %server.display_host(), database = %server.database, "Opening MySQL connection");
        self.conn = Some(options.connect().await.map_err(mysql_error)?);
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<ResultHandle, DriverError> {
        let conn = self.conn.as_mut().ok_or_else(DriverError::not_connected)?;

        let mut results = conn.fetch_many(sql);
        let mut rows = Vec::new();
        let mut affected_rows = 0;
        let mut last_insert_id = None;
        while let Some(step) = results.try_next().await.map_err(mysql_error)? {
            match step {
                Either::Left(done) => {
                    affected_rows += done.rows_affected();
                    let id = done.last_insert_id();
                    if id > 0 {
                        last_insert_id = Some(id as i64);
                    }
                }
                Either::Right(row) => rows.push(row),
            }
        }

        Ok(statement_outcome(sql, &rows, affected_rows, last_insert_id))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(mysql_error),
            None => Ok(()),
        }
    }

    fn is_lost_connection(&self, err: &DriverError) -> bool {
        err.code == "io" || LOST_CONNECTION_CODES.contains(&err.code.as_str())
    }

    fn is_deadlock(&self, err: &DriverError) -> bool {
        err.code == ER_LOCK_DEADLOCK
    }

    fn engine_name(&self) -> &'static str {
        "mysql"
    }
}
