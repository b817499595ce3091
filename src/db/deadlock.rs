//! Bounded retry of a write batch that loses deadlocks.

use crate::db::client::Client;
use crate::db::driver::Driver;
use crate::db::transaction::FlushMode;
use crate::error::DbResult;
use futures_util::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tracing::{error, warn};

impl<D: Driver> Client<D> {
    /// Run `batch` inside a transaction, retrying it when it loses a deadlock.
    ///
    /// A deadlock is either an error classified as one or a suppressed failure
    /// left in [`Client::last_error`]. Each retry rolls back, sleeps a random
    /// delay within the configured bounds and starts a fresh transaction. Any
    /// other error rolls back and is returned immediately. When the attempts
    /// run out the transaction is rolled back and the last deadlock returned.
    pub async fn run_with_deadlock_retry<T, F>(&mut self, tag: &str, mut batch: F) -> DbResult<T>
    where
        F: for<'a> FnMut(&'a mut Client<D>) -> BoxFuture<'a, DbResult<T>>,
    {
        let retry = self.config.deadlock;
        let mut attempts_left = retry.max_attempts.max(1);

        self.begin(tag).await?;
        loop {
            attempts_left -= 1;
            let outcome = batch(&mut *self).await;
            let deadlocked = match &outcome {
                Ok(_) => self.last_error_is_deadlock(),
                Err(e) => e.is_deadlock(),
            };

            if !deadlocked {
                return match outcome {
                    Ok(value) => {
                        self.commit(tag, FlushMode::Normal).await?;
                        Ok(value)
                    }
                    Err(e) => {
                        self.rollback_quietly(tag).await;
                        Err(e)
                    }
                };
            }

            let err = match outcome {
                Err(e) => e,
                Ok(_) => self.last_error_as_db_error(tag),
            };
            self.rollback_quietly(tag).await;

            if attempts_left == 0 {
                error!(caller = %tag, attempts = retry.max_attempts, "Deadlock retries exhausted");
                return Err(err);
            }

            let delay_us = {
                let mut rng = rand::thread_rng();
                rng.gen_range(retry.min_delay_us..=retry.max_delay_us)
            };
            warn!(caller = %tag, attempts_left, delay_us, error = %err, "Deadlock, retrying");
            tokio::time::sleep(Duration::from_micros(delay_us)).await;
            self.begin(tag).await?;
        }
    }

    async fn rollback_quietly(&mut self, tag: &str) {
        if let Err(e) = self.rollback(tag, FlushMode::Normal).await {
            error!(caller = %tag, error = %e, "Rollback failed");
        }
    }
}
