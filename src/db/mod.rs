//! Database client layer.
//!
//! - SQL rendering from structured values ([`builder`], [`dialect`])
//! - Engine drivers behind the [`Driver`] trait ([`drivers`])
//! - Connection state and statement execution ([`client`])
//! - Transactions and deferred callbacks ([`transaction`])
//! - Deadlock retry of write batches ([`deadlock`])
//! - Row decoding to JSON ([`types`])

pub mod builder;
pub mod client;
pub mod deadlock;
pub mod dialect;
pub mod driver;
pub mod drivers;
pub mod ops;
pub mod prepared;
pub mod transaction;
pub mod types;

pub use builder::{ListMode, SqlBuilder};
pub use client::{Callback, Client, ErrorPolicy, QueryFailure};
pub use dialect::{Dialect, GenericDialect};
pub use driver::{Driver, DriverError};
pub use drivers::{MySqlDriver, PostgresDriver, SqliteDriver};
pub use prepared::fill_prepared;
pub use transaction::{FlushMode, TrxState};
