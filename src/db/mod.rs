//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Driver traits for connections, statements and result sets
//! - The synchronous [`QueryRunner`] and its async facade
//! - Parameter binding with metadata fallback
//! - Result set cursors that always close
//! - A SQLite driver built on sqlx
//! - Parameter list macros

pub mod async_runner;
pub mod binder;
pub mod cursor;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod memory;
pub mod outparams;
pub mod sqlite;

pub use async_runner::{AsyncQueryRunner, CallResult, QueryFuture, SharedConnection};
pub use binder::ParameterBinder;
pub use cursor::{ResultCursor, RowIterator};
pub use driver::{
    CallableStatement, Column, Connection, ConnectionSource, GeneratedKeys, ParameterMetadata,
    PreparedStatement, ResultSet, Statement, StatementBase, StaticParameterMetadata,
};
pub use executor::QueryRunner;
pub use memory::MemoryResultSet;
pub use outparams::retrieve_out_parameters;
pub use sqlite::{SqliteConnection, SqliteSource, SqliteStatement};
