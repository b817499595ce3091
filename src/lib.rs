//! Transaction-aware database client.
//!
//! A [`db::Client`] wraps one connection to SQLite, PostgreSQL or MySQL and
//! adds SQL building from structured values, implicit transactions on write,
//! deferred idle and pre-commit callbacks, lost-connection replay and
//! deadlock retry.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{ClientConfig, ClientFlags, Config};
pub use db::{Client, Driver, ErrorPolicy, FlushMode};
pub use error::{DbError, DbResult};
