//! Data models for the database client.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, ServerConfig, TransactionInfo};
pub use query::{
    Cond, Conds, FieldRef, Fields, Join, JoinConds, LikePart, QueryOptions, Record, ResultHandle,
    ResultSet, Row, SelectQuery, TableRef, Tables,
};
