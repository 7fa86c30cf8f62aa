//! Query Runner Library
//!
//! This library runs SQL against a pluggable driver layer: it binds positional
//! parameters, applies statement options, hands result sets to handlers and
//! closes every resource it opened. A SQLite driver built on sqlx is included.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;

pub use config::{Config, RunnerOptions, StatementConfig};
pub use db::{AsyncQueryRunner, QueryRunner};
pub use error::{DbError, DbResult};
pub use handlers::{
    ArrayHandler, ArrayListHandler, ColumnListHandler, MapHandler, MapListHandler,
    ResultSetHandler, ScalarHandler,
};
pub use models::{OutParameter, Param, SqlType, Value};
