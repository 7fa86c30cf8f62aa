//! Result set handlers.
//!
//! A handler turns the rows of one result set into a value of its choosing.
//! The runner calls it exactly once per result set, positioned before the
//! first row, and closes the result set afterwards.
//!
//! Closures taking `&mut dyn ResultSet` are handlers too:
//!
//! ```
//! use query_runner::db::ResultSet;
//! use query_runner::error::DbResult;
//! use query_runner::handlers::ResultSetHandler;
//!
//! let count_rows = |rs: &mut dyn ResultSet| -> DbResult<usize> {
//!     let mut n = 0;
//!     while rs.next()? {
//!         n += 1;
//!     }
//!     Ok(n)
//! };
//! # fn takes<H: ResultSetHandler>(_: &H) {}
//! # takes(&count_rows);
//! ```

pub mod array;
pub mod column;
pub mod map;
pub mod row;
pub mod scalar;

pub use array::{ArrayHandler, ArrayListHandler};
pub use column::{ColumnListHandler, ColumnRef};
pub use map::{MapHandler, MapListHandler};
pub use row::{BasicRowProcessor, RowMap, RowProcessor};
pub use scalar::ScalarHandler;

use crate::db::ResultSet;
use crate::error::DbResult;

/// Converts a result set into an arbitrary value.
pub trait ResultSetHandler {
    type Output;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Self::Output>;
}

impl<F, T> ResultSetHandler for F
where
    F: Fn(&mut dyn ResultSet) -> DbResult<T>,
{
    type Output = T;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<T> {
        self(rs)
    }
}
