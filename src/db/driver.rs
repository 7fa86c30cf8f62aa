//! Driver abstraction.
//!
//! These traits describe the connection, statement and result set objects the
//! runner drives. A driver implements them; the runner never talks to a
//! database any other way.
//!
//! Borrowing encodes the ownership chain: a statement borrows its connection
//! and a result set borrows its statement, so a cursor can never outlive the
//! statement it came from, and a statement never outlives its connection.

use crate::config::FetchDirection;
use crate::error::DbResult;
use crate::models::{FromValue, SqlType, Value};
use std::time::Duration;

/// Whether a statement should report generated keys after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratedKeys {
    #[default]
    NotRequested,
    Requested,
}

/// Column description of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub label: String,
    /// Database-specific type (e.g., "INTEGER", "varchar", "TEXT")
    pub type_name: String,
    pub sql_type: SqlType,
}

impl Column {
    /// Create a column, deriving the SQL type from the declared type name.
    pub fn new(label: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            label: label.into(),
            sql_type: SqlType::from_type_name(&type_name),
            type_name,
        }
    }
}

/// Source of connections for operations that do not receive one explicitly.
///
/// Connections obtained here are owned by the runner and always closed by it.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> DbResult<Box<dyn Connection>>;
}

/// An open database connection.
pub trait Connection {
    /// A statement that executes literal SQL text.
    fn create_statement(&mut self) -> DbResult<Box<dyn Statement + '_>>;

    /// A statement with positional placeholders.
    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> DbResult<Box<dyn PreparedStatement + '_>>;

    /// A stored procedure call.
    fn prepare_call(&mut self, sql: &str) -> DbResult<Box<dyn CallableStatement + '_>>;

    fn close(&mut self) -> DbResult<()>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn create_statement(&mut self) -> DbResult<Box<dyn Statement + '_>> {
        (**self).create_statement()
    }

    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> DbResult<Box<dyn PreparedStatement + '_>> {
        (**self).prepare_statement(sql, keys)
    }

    fn prepare_call(&mut self, sql: &str) -> DbResult<Box<dyn CallableStatement + '_>> {
        (**self).prepare_call(sql)
    }

    fn close(&mut self) -> DbResult<()> {
        (**self).close()
    }
}

/// Options and lifecycle shared by every statement kind.
pub trait StatementBase {
    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DbResult<()>;
    fn set_fetch_size(&mut self, rows: u32) -> DbResult<()>;
    fn set_max_field_size(&mut self, bytes: u32) -> DbResult<()>;
    fn set_max_rows(&mut self, rows: u64) -> DbResult<()>;
    fn set_query_timeout(&mut self, timeout: Duration) -> DbResult<()>;

    /// Keys generated by the last update, when they were requested.
    fn generated_keys(&mut self) -> DbResult<Box<dyn ResultSet + '_>>;

    fn close(&mut self) -> DbResult<()>;
}

/// Statement executing literal SQL text.
pub trait Statement: StatementBase {
    fn execute_query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>>;
    fn execute_update(&mut self, sql: &str, keys: GeneratedKeys) -> DbResult<u64>;
}

/// Statement with positional placeholders, 1-indexed.
pub trait PreparedStatement: StatementBase {
    /// Placeholder descriptions. Drivers that cannot describe placeholders
    /// return an error; the runner then stops asking.
    fn parameter_metadata(&mut self) -> DbResult<Box<dyn ParameterMetadata>>;

    /// Bind a non-null value. `sql_type` is the declared type when known.
    fn set_value(&mut self, index: usize, value: &Value, sql_type: Option<SqlType>)
    -> DbResult<()>;

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()>;

    /// Queue the current bindings as one batch entry.
    fn add_batch(&mut self) -> DbResult<()>;

    fn execute_query(&mut self) -> DbResult<Box<dyn ResultSet + '_>>;
    fn execute_update(&mut self) -> DbResult<u64>;

    /// Execute every queued entry, returning one update count per entry.
    fn execute_batch(&mut self) -> DbResult<Vec<u64>>;
}

/// Stored procedure call.
pub trait CallableStatement: PreparedStatement {
    fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()>;

    /// Execute the call. Returns `true` when the first result is a result set.
    fn execute(&mut self) -> DbResult<bool>;

    /// The current result set, if the current result is one.
    fn result_set(&mut self) -> DbResult<Option<Box<dyn ResultSet + '_>>>;

    /// Advance to the next result. Returns `true` when it is a result set.
    fn more_results(&mut self) -> DbResult<bool>;

    /// Update count of the current result, `None` when it is a result set or
    /// there are no more results.
    fn update_count(&mut self) -> DbResult<Option<u64>>;

    /// Value of the OUT parameter at `index`.
    fn out_value(&mut self, index: usize) -> DbResult<Value>;
}

/// Forward-only cursor over query results.
pub trait ResultSet {
    /// Advance to the next row. Returns `false` when exhausted.
    fn next(&mut self) -> DbResult<bool>;

    fn columns(&self) -> &[Column];

    /// Value of the current row at `index` (1-based).
    fn value(&mut self, index: usize) -> DbResult<Value>;

    fn close(&mut self) -> DbResult<()>;

    fn is_closed(&self) -> bool;
}

impl dyn ResultSet + '_ {
    /// Typed value of the current row at `index` (1-based).
    pub fn get<T: FromValue>(&mut self, index: usize) -> DbResult<T> {
        T::from_value(self.value(index)?)
    }

    /// 1-based index of the column labelled `label`, compared case-insensitively.
    pub fn find_column(&self, label: &str) -> Option<usize> {
        self.columns()
            .iter()
            .position(|c| c.label.eq_ignore_ascii_case(label))
            .map(|i| i + 1)
    }
}

/// Placeholder descriptions of a prepared statement.
///
/// Owned by the caller once obtained; it is only used while the statement that
/// produced it is being bound.
pub trait ParameterMetadata: Send {
    fn parameter_count(&self) -> DbResult<usize>;

    /// Declared type of the placeholder at `index` (1-based).
    fn parameter_type(&self, index: usize) -> DbResult<SqlType>;
}

/// Metadata with every placeholder type known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticParameterMetadata {
    types: Vec<SqlType>,
}

impl StaticParameterMetadata {
    pub fn new(types: Vec<SqlType>) -> Self {
        Self { types }
    }
}

impl ParameterMetadata for StaticParameterMetadata {
    fn parameter_count(&self) -> DbResult<usize> {
        Ok(self.types.len())
    }

    fn parameter_type(&self, index: usize) -> DbResult<SqlType> {
        index
            .checked_sub(1)
            .and_then(|i| self.types.get(i))
            .copied()
            .ok_or_else(|| {
                crate::error::DbError::binding_at(
                    index,
                    format!("Parameter index out of range (count: {})", self.types.len()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_sql_type_from_name() {
        let col = Column::new("id", "INTEGER");
        assert_eq!(col.sql_type, SqlType::Integer);
        assert_eq!(col.type_name, "INTEGER");
    }

    #[test]
    fn test_static_metadata() {
        let pmd = StaticParameterMetadata::new(vec![SqlType::Integer, SqlType::Varchar]);
        assert_eq!(pmd.parameter_count().unwrap(), 2);
        assert_eq!(pmd.parameter_type(2).unwrap(), SqlType::Varchar);
        assert!(pmd.parameter_type(0).is_err());
        assert!(pmd.parameter_type(3).is_err());
    }
}
