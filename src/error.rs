//! Error types for the database client.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Sequencing anomalies (commit with nothing open, nested begin) are not errors: they
//! are logged as caller warnings and execution continues.

use thiserror::Error;

/// How a failed statement was classified by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The engine chose this statement as a deadlock victim.
    Deadlock,
    /// The connection dropped while the statement was in flight.
    LostConnection,
    Other,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query error {code}: {message} (caller: {caller}) while running: {sql}")]
    Query {
        message: String,
        /// Engine error code, e.g. "1213" or "40P01"
        code: String,
        sql: String,
        caller: String,
        class: FailureClass,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Unsupported operation: {operation} - {reason}")]
    Unsupported { operation: String, reason: String },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error for a failed statement.
    pub fn query(
        message: impl Into<String>,
        code: impl Into<String>,
        sql: impl Into<String>,
        caller: impl Into<String>,
        class: FailureClass,
    ) -> Self {
        Self::Query {
            message: message.into(),
            code: code.into(),
            sql: sql.into(),
            caller: caller.into(),
            class,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Engine error code of a failed statement.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this error is a deadlock reported by the engine.
    pub fn is_deadlock(&self) -> bool {
        matches!(
            self,
            Self::Query {
                class: FailureClass::Deadlock,
                ..
            }
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
