//! sqlx-backed drivers, one physical connection each.
//!
//! Statements are sent as plain text (no server-side prepare) so that
//! transaction control and multi-statement SQL behave as typed.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::db::dialect::returns_rows;
use crate::db::driver::DriverError;
use crate::db::types::{RowToJson, to_result_set};
use crate::models::ResultHandle;

/// Shape one statement's outcome from what the engine sent back.
///
/// Any row makes it a read. A statement that produced no rows is still a
/// read when its text yields a result set.
pub(crate) fn statement_outcome<R: RowToJson>(
    sql: &str,
    rows: &[R],
    affected_rows: u64,
    last_insert_id: Option<i64>,
) -> ResultHandle {
    if !rows.is_empty() || returns_rows(sql) {
        ResultHandle::Rows(to_result_set(rows))
    } else {
        ResultHandle::Write {
            affected_rows,
            last_insert_id,
        }
    }
}

/// Convert a sqlx failure into a driver error, keeping the engine code.
pub(crate) fn driver_error(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db_err) => DriverError::new(
            db_err.code().map(|c| c.into_owned()).unwrap_or_default(),
            db_err.message(),
        ),
        sqlx::Error::Io(io_err) => DriverError::io(io_err.to_string()),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => DriverError::io(err.to_string()),
        other => DriverError::new("driver", other.to_string()),
    }
}
