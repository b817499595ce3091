//! Connection state and query execution.
//!
//! A [`Client`] owns one driver (one physical connection) and mediates every
//! statement sent through it: it applies the implicit-transaction policy,
//! annotates SQL with a trace comment, recovers once from a lost connection
//! and turns driver failures into [`DbError`]s or suppressed failure results.
//!
//! A client is not meant to be shared between tasks; each worker owns its own.

use crate::config::{ClientConfig, ClientFlags};
use crate::db::dialect::is_transaction_control;
use crate::db::driver::{Driver, DriverError};
use crate::error::{DbError, DbResult, FailureClass};
use crate::models::{ResultHandle, TransactionInfo};
use futures_util::future::BoxFuture;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statements logged under the debug flag are cut to this many characters.
const DEBUG_SQL_MAX_CHARS: usize = 500;
/// Reconnects later than this into a request are routine and logged at info.
const RECONNECT_LOG_THRESHOLD: Duration = Duration::from_secs(300);
const ACTOR_MAX_CHARS: usize = 15;

/// What to do when a statement fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return the failure as an error, unless the client ignores errors.
    #[default]
    Raise,
    /// Log it and return [`ResultHandle::Failed`].
    Suppress,
}

/// Details of the most recent failed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub code: String,
    pub message: String,
    pub class: FailureClass,
}

/// A deferred action run against the client.
pub type Callback<D> =
    Box<dyn for<'a> FnOnce(&'a mut Client<D>) -> BoxFuture<'a, DbResult<()>> + Send>;

pub(crate) struct PendingCallback<D: Driver> {
    pub(crate) origin: String,
    pub(crate) callback: Callback<D>,
}

pub struct Client<D: Driver> {
    pub(crate) driver: D,
    pub(crate) config: ClientConfig,
    pub(crate) flags: ClientFlags,
    opened: bool,
    last_query: String,
    last_error: Option<QueryFailure>,
    error_count: u64,
    done_writes: bool,
    affected_rows: u64,
    insert_id: Option<i64>,
    query_count: u64,
    request_started: Instant,
    pub(crate) trx: Option<TransactionInfo>,
    pub(crate) idle_callbacks: Vec<PendingCallback<D>>,
    pub(crate) pre_commit_callbacks: Vec<PendingCallback<D>>,
    pub(crate) draining_idle: bool,
    pub(crate) in_pre_commit: bool,
    pub(crate) caller_warnings: u64,
}

impl<D: Driver> Client<D> {
    /// Connect `driver` using `config`.
    pub async fn open(driver: D, config: ClientConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;

        let mut client = Self {
            driver,
            flags: config.flags,
            config,
            opened: false,
            last_query: String::new(),
            last_error: None,
            error_count: 0,
            done_writes: false,
            affected_rows: 0,
            insert_id: None,
            query_count: 0,
            request_started: Instant::now(),
            trx: None,
            idle_callbacks: Vec::new(),
            pre_commit_callbacks: Vec::new(),
            draining_idle: false,
            in_pre_commit: false,
            caller_warnings: 0,
        };
        client.driver.set_buffered(client.flags.buffer);
        client.reconnect().await?;

        info!(
            engine = client.driver.engine_name(),
            host = %client.config.server.display_host(),
            database = %client.config.server.database,
            "Database connection opened"
        );
        Ok(client)
    }

    /// (Re)establish the physical connection under the connect timeout.
    pub(crate) async fn reconnect(&mut self) -> DbResult<()> {
        let timeout = self.config.connect_timeout();
        let server = &self.config.server;

        match tokio::time::timeout(timeout, self.driver.connect(server)).await {
            Ok(Ok(())) => {
                self.opened = true;
                Ok(())
            }
            Ok(Err(e)) => {
                self.opened = false;
                Err(DbError::connection(
                    format!("{} ({}): {}", server.display_host(), server.database, e),
                    "Check that the database server is running and the credentials are valid",
                ))
            }
            Err(_) => {
                self.opened = false;
                Err(DbError::timeout(
                    format!("connect to {}", server.display_host()),
                    timeout.as_secs() as u32,
                ))
            }
        }
    }

    pub(crate) fn ensure_open(&self) -> DbResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(DbError::connection(
                "connection was already closed",
                "Open a new client",
            ))
        }
    }

    /// Run `sql`, raising errors unless the client ignores them.
    pub async fn query(&mut self, sql: &str, tag: &str) -> DbResult<ResultHandle> {
        self.query_with(sql, tag, ErrorPolicy::Raise).await
    }

    /// Run `sql` with an explicit error policy.
    ///
    /// A write opens an implicit transaction first when auto-trx is enabled
    /// and none is open.
    pub async fn query_with(
        &mut self,
        sql: &str,
        tag: &str,
        policy: ErrorPolicy,
    ) -> DbResult<ResultHandle> {
        self.last_query = sql.to_string();
        self.ensure_open()?;

        let is_write = self.driver.is_write_query(sql);
        if is_write {
            self.done_writes = true;
            if self.flags.auto_trx && self.trx.is_none() && !is_transaction_control(sql) {
                self.open_transaction(tag, true).await?;
            }
            if let Some(trx) = self.trx.as_mut() {
                trx.done_writes = true;
            }
        }

        self.run_query(sql, tag, policy).await
    }

    /// Send one statement to the driver, reissuing it once on a fresh
    /// connection if the old one was lost.
    pub(crate) async fn run_query(
        &mut self,
        sql: &str,
        tag: &str,
        policy: ErrorPolicy,
    ) -> DbResult<ResultHandle> {
        self.last_query = sql.to_string();
        self.ensure_open()?;
        let commented = self.annotate(sql, tag);

        self.query_count += 1;
        if self.flags.debug {
            debug!(
                n = self.query_count,
                server = %self.config.server.display_host(),
                sql = %debug_sql(&commented),
                "SQL"
            );
        }

        let err = match self.driver.run_statement(&commented).await {
            Ok(handle) => return Ok(self.record_success(handle)),
            Err(err) => err,
        };
        if !self.driver.is_lost_connection(&err) {
            return self.report_query_error(err, sql, tag, policy);
        }

        self.recover_lost_connection(&err, tag).await?;
        self.query_count += 1;
        match self.driver.run_statement(&commented).await {
            Ok(handle) => Ok(self.record_success(handle)),
            Err(err) => self.report_query_error(err, sql, tag, policy),
        }
    }

    /// Forget the remote transaction and its callbacks, then reconnect.
    async fn recover_lost_connection(&mut self, err: &DriverError, tag: &str) -> DbResult<()> {
        if let Some(trx) = self.trx.take() {
            warn!(
                caller = %tag,
                origin = %trx.origin,
                transaction_id = %trx.id,
                "Transaction lost with the connection"
            );
        }
        let dropped = self.idle_callbacks.len() + self.pre_commit_callbacks.len();
        self.idle_callbacks.clear();
        self.pre_commit_callbacks.clear();
        if dropped > 0 {
            warn!(caller = %tag, dropped, "Discarded transaction callbacks of the lost connection");
        }

        let elapsed = self.request_started.elapsed();
        if elapsed < RECONNECT_LOG_THRESHOLD {
            error!(
                caller = %tag,
                server = %self.config.server.display_host(),
                error = %err,
                "Lost connection, attempting to reconnect"
            );
        } else {
            info!(
                caller = %tag,
                server = %self.config.server.display_host(),
                elapsed_secs = elapsed.as_secs(),
                "Lost connection, attempting to reconnect"
            );
        }

        self.reconnect().await.inspect_err(|e| {
            error!(caller = %tag, error = %e, "Reconnect failed");
        })
    }

    fn record_success(&mut self, handle: ResultHandle) -> ResultHandle {
        self.last_error = None;
        match &handle {
            ResultHandle::Write {
                affected_rows,
                last_insert_id,
            } => {
                self.affected_rows = *affected_rows;
                if last_insert_id.is_some() {
                    self.insert_id = *last_insert_id;
                }
            }
            ResultHandle::Rows(rs) => self.affected_rows = rs.len() as u64,
            ResultHandle::Failed => {}
        }
        handle
    }

    fn report_query_error(
        &mut self,
        err: DriverError,
        sql: &str,
        tag: &str,
        policy: ErrorPolicy,
    ) -> DbResult<ResultHandle> {
        let class = if self.driver.is_deadlock(&err) {
            FailureClass::Deadlock
        } else if self.driver.is_lost_connection(&err) {
            FailureClass::LostConnection
        } else {
            FailureClass::Other
        };

        self.error_count += 1;
        self.last_error = Some(QueryFailure {
            code: err.code.clone(),
            message: err.message.clone(),
            class,
        });

        if self.flags.ignore_errors || policy == ErrorPolicy::Suppress {
            debug!(
                caller = %tag,
                code = %err.code,
                error = %err.message,
                sql = %one_line(sql),
                "SQL ERROR (ignored)"
            );
            return Ok(ResultHandle::Failed);
        }

        error!(
            caller = %tag,
            server = %self.config.server.display_host(),
            code = %err.code,
            error = %err.message,
            sql = %one_line(sql),
            "Query error"
        );
        Err(DbError::query(err.message, err.code, sql, tag, class))
    }

    /// Put a `/* tag actor */` comment into the statement for server-side logs.
    fn annotate(&self, sql: &str, tag: &str) -> String {
        let tag = tag.replace("*/", "");
        let comment = match self.config.actor.as_deref().map(truncate_actor) {
            Some(actor) if !actor.is_empty() => format!("/* {tag} {actor} */"),
            _ => format!("/* {tag} */"),
        };

        match sql.char_indices().find(|(_, c)| c.is_whitespace()) {
            Some((idx, c)) => format!("{} {} {}", &sql[..idx], comment, &sql[idx + c.len_utf8()..]),
            None => format!("{sql} {comment}"),
        }
    }

    /// Check the connection and reconnect if it is gone.
    ///
    /// Any other failure is reported like a failed query and leaves the
    /// transaction and its callbacks in place.
    pub async fn ping(&mut self) -> DbResult<()> {
        const PING: &str = "SELECT 1";

        self.ensure_open()?;
        match self.driver.run_statement(PING).await {
            Ok(_) => Ok(()),
            Err(err) if self.driver.is_lost_connection(&err) => {
                self.recover_lost_connection(&err, "ping").await
            }
            Err(err) => self
                .report_query_error(err, PING, "ping", ErrorPolicy::Raise)
                .map(|_| ()),
        }
    }

    /// Mark the start of a new request; only affects reconnect log severity.
    pub fn reset_request_clock(&mut self) {
        self.request_started = Instant::now();
    }

    pub(crate) fn mark_closed(&mut self) {
        self.opened = false;
    }

    pub(crate) fn last_error_is_deadlock(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(|e| e.class == FailureClass::Deadlock)
    }

    /// The most recent failure as a query error, for reporting after a
    /// suppressed statement.
    pub(crate) fn last_error_as_db_error(&self, tag: &str) -> DbError {
        match &self.last_error {
            Some(f) => DbError::query(
                f.message.clone(),
                f.code.clone(),
                self.last_query.clone(),
                tag,
                f.class,
            ),
            None => DbError::internal("no failed statement recorded"),
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn last_query(&self) -> &str {
        &self.last_query
    }

    pub fn last_error(&self) -> Option<&QueryFailure> {
        self.last_error.as_ref()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Whether any write was ever sent on this connection.
    pub fn done_writes(&self) -> bool {
        self.done_writes
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn insert_id(&self) -> Option<i64> {
        self.insert_id
    }

    /// Statements sent to the driver so far, replays included.
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn flags(&self) -> ClientFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ClientFlags) {
        if flags.buffer != self.flags.buffer {
            self.driver.set_buffered(flags.buffer);
        }
        self.flags = flags;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: Driver> Drop for Client<D> {
    fn drop(&mut self) {
        if let Some(trx) = self.trx.as_ref().filter(|t| t.done_writes) {
            warn!(
                origin = %trx.origin,
                transaction_id = %trx.id,
                "Client dropped with uncommitted writes"
            );
        }
        let pending = self.idle_callbacks.len() + self.pre_commit_callbacks.len();
        if pending > 0 {
            let origins: Vec<&str> = self
                .idle_callbacks
                .iter()
                .chain(self.pre_commit_callbacks.iter())
                .map(|cb| cb.origin.as_str())
                .collect();
            warn!(pending, origins = ?origins, "Client dropped with pending transaction callbacks");
        }
    }
}

/// Actor name for the trace comment: no slashes, at most 15 characters.
fn truncate_actor(actor: &str) -> String {
    let cleaned: String = actor.chars().filter(|c| *c != '/').collect();
    if cleaned.chars().count() > ACTOR_MAX_CHARS {
        let head: String = cleaned.chars().take(ACTOR_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        cleaned
    }
}

fn one_line(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn debug_sql(sql: &str) -> String {
    let flat = sql.replace(['\t', '\n', '\r'], " ");
    if flat.chars().count() > DEBUG_SQL_MAX_CHARS {
        let head: String = flat.chars().take(DEBUG_SQL_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        flat
    }
}
