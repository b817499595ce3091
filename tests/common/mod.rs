//! Scripted in-memory driver shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use db_client::config::{ClientConfig, ClientFlags, DeadlockRetry};
use db_client::db::{Client, Dialect, Driver, DriverError};
use db_client::models::{ResultHandle, ResultSet, ServerConfig};
use std::collections::VecDeque;

pub const LOST: &str = "lost";
pub const DEADLOCK: &str = "deadlock";

/// A failure returned the next time a statement starting with `verb` runs.
struct ScriptedFailure {
    verb: String,
    error: DriverError,
}

/// Driver that records every statement and fails on request.
#[derive(Default)]
pub struct MockDriver {
    /// Statements as received, trace comment included.
    pub statements: Vec<String>,
    pub connects: u32,
    pub closed: bool,
    pub fail_connect: bool,
    /// Last buffering mode the client asked for.
    pub buffered: Option<bool>,
    failures: VecDeque<ScriptedFailure>,
    reads: VecDeque<ResultSet>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next statement starting with `verb` with `code`.
    pub fn fail_next(&mut self, verb: &str, code: &str) {
        self.failures.push_back(ScriptedFailure {
            verb: verb.to_uppercase(),
            error: DriverError::new(code, format!("scripted {code} failure")),
        });
    }

    /// Rows returned by the next read statement.
    pub fn push_rows(&mut self, rs: ResultSet) {
        self.reads.push_back(rs);
    }

    /// First word of each statement, uppercased.
    pub fn verbs(&self) -> Vec<String> {
        self.statements
            .iter()
            .map(|s| first_word(s).to_uppercase())
            .collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.verbs().iter().filter(|v| *v == verb).count()
    }

    /// Statements with their trace comments removed.
    pub fn plain_statements(&self) -> Vec<String> {
        self.statements.iter().map(|s| strip_comment(s)).collect()
    }
}

fn first_word(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or_default()
}

fn strip_comment(sql: &str) -> String {
    match (sql.find(" /* "), sql.find(" */")) {
        (Some(start), Some(end)) if end > start => {
            format!("{}{}", &sql[..start], &sql[end + 3..])
        }
        _ => sql.to_string(),
    }
}

impl Dialect for MockDriver {
    fn ignore_keyword(&self) -> Option<&'static str> {
        Some("IGNORE")
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&mut self, _server: &ServerConfig) -> Result<(), DriverError> {
        if self.fail_connect {
            return Err(DriverError::io("connection refused"));
        }
        self.connects += 1;
        self.closed = false;
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<ResultHandle, DriverError> {
        self.statements.push(sql.to_string());

        let verb = first_word(sql).to_uppercase();
        if let Some(pos) = self.failures.iter().position(|f| f.verb == verb) {
            if let Some(failure) = self.failures.remove(pos) {
                return Err(failure.error);
            }
        }

        if self.is_write_query(sql) {
            Ok(ResultHandle::Write {
                affected_rows: 1,
                last_insert_id: None,
            })
        } else {
            Ok(ResultHandle::Rows(self.reads.pop_front().unwrap_or_default()))
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        Ok(())
    }

    fn is_lost_connection(&self, err: &DriverError) -> bool {
        err.code == LOST
    }

    fn is_deadlock(&self, err: &DriverError) -> bool {
        err.code == DEADLOCK
    }

    fn set_buffered(&mut self, buffered: bool) {
        self.buffered = Some(buffered);
    }

    fn engine_name(&self) -> &'static str {
        "mock"
    }
}

pub fn test_config(flags: ClientFlags) -> ClientConfig {
    let mut config = ClientConfig::new(ServerConfig::sqlite(":memory:")).with_flags(flags);
    config.deadlock = DeadlockRetry {
        max_attempts: 3,
        min_delay_us: 1,
        max_delay_us: 10,
    };
    config
}

pub async fn open_mock(flags: ClientFlags) -> Client<MockDriver> {
    open_with(MockDriver::new(), flags).await
}

pub async fn open_with(driver: MockDriver, flags: ClientFlags) -> Client<MockDriver> {
    Client::open(driver, test_config(flags))
        .await
        .expect("mock client opens")
}

pub fn auto_trx() -> ClientFlags {
    ClientFlags {
        auto_trx: true,
        ..ClientFlags::default()
    }
}
