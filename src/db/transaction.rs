//! Transaction state machine and deferred callbacks.
//!
//! One transaction level at most: a `begin` while a transaction is open
//! commits the old one first. Idle callbacks run once no transaction is open;
//! pre-commit callbacks run right before COMMIT. Rollback cancels both.

use crate::db::client::{Callback, Client, ErrorPolicy, PendingCallback};
use crate::db::driver::Driver;
use crate::error::{DbError, DbResult};
use crate::models::TransactionInfo;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, error, warn};

/// Transaction state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrxState {
    Idle,
    /// Opened by `begin`.
    OpenExplicit,
    /// Opened implicitly by a write under auto-trx.
    OpenAutomatic,
}

/// Whether a commit/rollback is a caller's normal request or an internal
/// flush of whatever happens to be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushMode {
    #[default]
    Normal,
    /// Silent when nothing is open; warns when an explicit transaction is flushed.
    Flush,
}

/// Short unique id for log correlation.
fn generate_transaction_id() -> String {
    format!("trx_{}", uuid::Uuid::new_v4().simple())
}

impl<D: Driver> Client<D> {
    pub fn trx_level(&self) -> u8 {
        u8::from(self.trx.is_some())
    }

    pub fn trx_state(&self) -> TrxState {
        match &self.trx {
            None => TrxState::Idle,
            Some(trx) if trx.automatic => TrxState::OpenAutomatic,
            Some(_) => TrxState::OpenExplicit,
        }
    }

    pub fn transaction_info(&self) -> Option<&TransactionInfo> {
        self.trx.as_ref()
    }

    /// Whether the open transaction has writes or callbacks waiting on it.
    pub fn write_pending(&self) -> bool {
        self.trx.as_ref().is_some_and(|t| t.done_writes)
            || !self.idle_callbacks.is_empty()
            || !self.pre_commit_callbacks.is_empty()
    }

    /// Number of transaction sequencing warnings logged so far.
    pub fn caller_warning_count(&self) -> u64 {
        self.caller_warnings
    }

    pub(crate) fn caller_warning(&mut self, tag: &str, message: &str) {
        self.caller_warnings += 1;
        warn!(target: "db_client::caller", caller = %tag, "{message}");
    }

    fn trx_id(&self) -> String {
        self.trx.as_ref().map(|t| t.id.clone()).unwrap_or_default()
    }

    fn refuse_in_pre_commit(&self, operation: &str) -> DbResult<()> {
        if self.in_pre_commit {
            return Err(DbError::transaction(
                format!("{operation} is not allowed inside a pre-commit callback"),
                self.trx_id(),
            ));
        }
        Ok(())
    }

    /// Issue BEGIN and record the new transaction.
    pub(crate) async fn open_transaction(&mut self, tag: &str, automatic: bool) -> DbResult<()> {
        let handle = self.run_query("BEGIN", tag, ErrorPolicy::Raise).await?;
        if handle.is_failed() {
            return Ok(());
        }

        let id = generate_transaction_id();
        debug!(caller = %tag, transaction_id = %id, automatic, "Transaction started");
        self.trx = Some(TransactionInfo {
            id,
            origin: tag.to_string(),
            automatic,
            done_writes: false,
            started_at: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn do_commit(&mut self, tag: &str) -> DbResult<()> {
        self.run_query("COMMIT", tag, ErrorPolicy::Raise).await?;
        if let Some(trx) = self.trx.take() {
            debug!(caller = %tag, transaction_id = %trx.id, "Transaction committed");
        }
        Ok(())
    }

    /// Start an explicit transaction, committing any open one first.
    pub async fn begin(&mut self, tag: &str) -> DbResult<()> {
        self.refuse_in_pre_commit("begin")?;

        if let Some(trx) = &self.trx {
            if !trx.automatic {
                let message = format!(
                    "Implicit commit of explicit transaction started by {}",
                    trx.origin
                );
                self.caller_warning(tag, &message);
            } else if trx.done_writes {
                debug!(caller = %tag, origin = %trx.origin, "Implicit commit of automatic transaction with writes");
            }
            self.run_pre_commit_callbacks().await?;
            self.do_commit(tag).await?;
            self.run_idle_callbacks().await?;
        }

        self.open_transaction(tag, false).await
    }

    /// Commit the open transaction, running pre-commit callbacks before and
    /// idle callbacks after.
    pub async fn commit(&mut self, tag: &str, mode: FlushMode) -> DbResult<()> {
        self.refuse_in_pre_commit("commit")?;

        match (self.trx.as_ref().map(|t| t.automatic), mode) {
            (None, FlushMode::Normal) => self.caller_warning(tag, "No transaction to commit"),
            (Some(true), FlushMode::Normal) => {
                self.caller_warning(tag, "Explicit commit of implicit transaction")
            }
            (Some(false), FlushMode::Flush) => {
                self.caller_warning(tag, "Flushing an explicit transaction")
            }
            _ => {}
        }

        self.run_pre_commit_callbacks().await?;
        if self.trx.is_some() {
            self.do_commit(tag).await?;
        }
        self.run_idle_callbacks().await
    }

    /// Roll back the open transaction and cancel every pending callback.
    pub async fn rollback(&mut self, tag: &str, mode: FlushMode) -> DbResult<()> {
        self.refuse_in_pre_commit("rollback")?;

        match (self.trx.as_ref().map(|t| t.automatic), mode) {
            (None, FlushMode::Normal) => self.caller_warning(tag, "No transaction to roll back"),
            (Some(false), FlushMode::Flush) => {
                self.caller_warning(tag, "Flushing an explicit transaction")
            }
            _ => {}
        }

        let discarded = self.idle_callbacks.len() + self.pre_commit_callbacks.len();
        self.idle_callbacks.clear();
        self.pre_commit_callbacks.clear();
        if discarded > 0 {
            debug!(caller = %tag, discarded, "Cancelled transaction callbacks");
        }

        if let Some(trx) = self.trx.take() {
            debug!(caller = %tag, transaction_id = %trx.id, "Transaction rolled back");
            self.run_query("ROLLBACK", tag, ErrorPolicy::Suppress).await?;
        }
        Ok(())
    }

    /// Run `callback` once no transaction is open: now if idle, otherwise
    /// when the open transaction commits. Rolled-back transactions cancel it.
    pub async fn on_transaction_idle<F>(&mut self, tag: &str, callback: F) -> DbResult<()>
    where
        F: for<'a> FnOnce(&'a mut Client<D>) -> BoxFuture<'a, DbResult<()>> + Send + 'static,
    {
        self.idle_callbacks.push(PendingCallback {
            origin: tag.to_string(),
            callback: Box::new(callback) as Callback<D>,
        });
        if self.trx.is_none() {
            self.run_idle_callbacks().await
        } else {
            Ok(())
        }
    }

    /// Run `callback` just before the open transaction commits, or as an idle
    /// callback when no transaction is open.
    pub async fn on_transaction_pre_commit_or_idle<F>(
        &mut self,
        tag: &str,
        callback: F,
    ) -> DbResult<()>
    where
        F: for<'a> FnOnce(&'a mut Client<D>) -> BoxFuture<'a, DbResult<()>> + Send + 'static,
    {
        if self.trx.is_some() {
            self.pre_commit_callbacks.push(PendingCallback {
                origin: tag.to_string(),
                callback: Box::new(callback),
            });
            Ok(())
        } else {
            self.on_transaction_idle(tag, callback).await
        }
    }

    /// Drain the idle queue until it stays empty or a callback leaves a
    /// transaction open. Every callback runs; the last error is returned.
    pub(crate) async fn run_idle_callbacks(&mut self) -> DbResult<()> {
        if self.draining_idle {
            return Ok(());
        }
        self.draining_idle = true;

        let mut last_err: Option<DbError> = None;
        while self.trx.is_none() && !self.idle_callbacks.is_empty() {
            let batch = std::mem::take(&mut self.idle_callbacks);
            for pending in batch {
                let auto_trx = self.flags.auto_trx;
                self.flags.auto_trx = false;
                let outcome = (pending.callback)(&mut *self).await;
                self.flags.auto_trx = auto_trx;

                if let Err(e) = outcome {
                    if let Some(prev) = last_err.replace(e) {
                        error!(error = %prev, "Idle callback failed");
                    }
                    if self.trx.is_some() {
                        if let Err(rb) = self.rollback(&pending.origin, FlushMode::Flush).await {
                            error!(error = %rb, "Rollback after failed idle callback failed");
                        }
                    }
                }
            }
        }

        self.draining_idle = false;
        last_err.map_or(Ok(()), Err)
    }

    /// Drain the pre-commit queue, including callbacks added while draining.
    async fn run_pre_commit_callbacks(&mut self) -> DbResult<()> {
        if self.in_pre_commit {
            return Ok(());
        }
        self.in_pre_commit = true;

        let mut last_err: Option<DbError> = None;
        while !self.pre_commit_callbacks.is_empty() {
            let batch = std::mem::take(&mut self.pre_commit_callbacks);
            for pending in batch {
                if let Err(e) = (pending.callback)(&mut *self).await {
                    if let Some(prev) = last_err.replace(e) {
                        error!(error = %prev, "Pre-commit callback failed");
                    }
                }
            }
        }

        self.in_pre_commit = false;
        last_err.map_or(Ok(()), Err)
    }

    /// Commit whatever is open and close the connection.
    pub async fn close(&mut self) -> DbResult<()> {
        if let Some(trx) = &self.trx {
            if !trx.automatic {
                let message = format!(
                    "Closing with an open explicit transaction started by {}",
                    trx.origin
                );
                self.caller_warning("close", &message);
            }
            self.commit("close", FlushMode::Flush).await?;
        }

        if !self.idle_callbacks.is_empty() || !self.pre_commit_callbacks.is_empty() {
            return Err(DbError::transaction(
                "transaction callbacks still pending on close",
                self.trx_id(),
            ));
        }

        if self.is_open() {
            self.mark_closed();
            self.driver.close().await.map_err(|e| {
                DbError::connection(e.to_string(), "The connection was dropped uncleanly")
            })?;
        }
        Ok(())
    }
}
