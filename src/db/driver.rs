//! Engine driver interface.
//!
//! A driver owns exactly one physical connection and knows how to run a
//! statement on it and how to classify the failures it reports. It also
//! supplies the engine's [`Dialect`]. The client composes a driver; it never
//! inherits from one.

use crate::db::dialect::Dialect;
use crate::models::{ResultHandle, ServerConfig};
use async_trait::async_trait;
use thiserror::Error;

/// A failure reported by the engine or the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DriverError {
    /// Engine error code, e.g. "1213", "40P01", or "io" for transport failures
    pub code: String,
    pub message: String,
}

impl DriverError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport-level failure with no engine code.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new("io", message)
    }

    /// The driver has no open connection.
    pub fn not_connected() -> Self {
        Self::new("not_connected", "no open connection")
    }
}

#[async_trait]
pub trait Driver: Dialect + Send + 'static {
    /// Open (or reopen) the physical connection.
    async fn connect(&mut self, server: &ServerConfig) -> Result<(), DriverError>;

    /// Run one statement. Returned rows make a read outcome; a statement
    /// without rows is a write outcome unless its text yields a result set.
    async fn run_statement(&mut self, sql: &str) -> Result<ResultHandle, DriverError>;

    /// Close the physical connection.
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Whether `err` means the connection dropped and the statement may be
    /// reissued on a fresh connection.
    fn is_lost_connection(&self, err: &DriverError) -> bool;

    /// Whether `err` means the statement lost a deadlock.
    fn is_deadlock(&self, err: &DriverError) -> bool;

    /// Toggle client-side buffering of read results.
    ///
    /// Drivers that always materialize results may ignore it.
    fn set_buffered(&mut self, _buffered: bool) {}

    /// Short engine name for log lines.
    fn engine_name(&self) -> &'static str;
}
