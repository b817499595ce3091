use super::{driver_error, statement_outcome};
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverError};
use crate::models::{ResultHandle, ServerConfig};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Either, Executor};
use tracing::debug;

/// deadlock_detected
const DEADLOCK_DETECTED: &str = "40P01";
/// admin_shutdown
const ADMIN_SHUTDOWN: &str = "57P01";

#[derive(Default)]
pub struct PostgresDriver {
    conn: Option<PgConnection>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for PostgresDriver {
    // standard_conforming_strings: backslashes are literal
    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn insert_ignore_suffix(&self) -> &'static str {
        " ON CONFLICT DO NOTHING"
    }

    fn lock_clause(&self, flag: &str) -> Option<&'static str> {
        match flag {
            "FOR UPDATE" => Some("FOR UPDATE"),
            "LOCK IN SHARE MODE" => Some("FOR SHARE"),
            _ => None,
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn connect(&mut self, server: &ServerConfig) -> Result<(), DriverError> {
        if let Some(old) = self.conn.take() {
            let _ = old.close().await;
        }

        let mut options = PgConnectOptions::new()
            .host(&server.host)
            .username(&server.user)
            .password(&server.password)
            .database(&server.database);
        if let Some(port) = server.port {
            options = options.port(port);
        }

        debug!(host = %server.display_host(), database = %server.database, "Opening PostgreSQL connection");
        self.conn = Some(options.connect().await.map_err(driver_error)?);
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<ResultHandle, DriverError> {
        let conn = self.conn.as_mut().ok_or_else(DriverError::not_connected)?;

        let mut results = conn.fetch_many(sql);
        let mut rows = Vec::new();
        let mut affected_rows = 0;
        while let Some(step) = results.try_next().await.map_err(driver_error)? {
            match step {
                Either::Left(done) => affected_rows += done.rows_affected(),
                Either::Right(row) => rows.push(row),
            }
        }

        Ok(statement_outcome(sql, &rows, affected_rows, None))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(driver_error),
            None => Ok(()),
        }
    }

    fn is_lost_connection(&self, err: &DriverError) -> bool {
        err.code == "io" || err.code.starts_with("08") || err.code == ADMIN_SHUTDOWN
    }

    fn is_deadlock(&self, err: &DriverError) -> bool {
        err.code == DEADLOCK_DETECTED
    }

    fn engine_name(&self) -> &'static str {
        "postgres"
    }
}
