//! Single-column handlers.

use crate::db::ResultSet;
use crate::error::{DbError, DbResult};
use crate::handlers::ResultSetHandler;
use crate::models::FromValue;
use std::marker::PhantomData;

/// A column selected by 1-based index or by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Index(usize),
    Label(String),
}

impl Default for ColumnRef {
    fn default() -> Self {
        Self::Index(1)
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for ColumnRef {
    fn from(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

impl ColumnRef {
    /// 1-based index of the column in `rs`.
    pub fn resolve(&self, rs: &dyn ResultSet) -> DbResult<usize> {
        match self {
            Self::Index(index) => Ok(*index),
            Self::Label(label) => rs
                .find_column(label)
                .ok_or_else(|| DbError::handler(format!("Column not found: {}", label))),
        }
    }
}

/// One column of every row, converted to `T`.
#[derive(Debug, Clone)]
pub struct ColumnListHandler<T> {
    column: ColumnRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ColumnListHandler<T> {
    pub fn new(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ColumnListHandler<T> {
    fn default() -> Self {
        Self::new(ColumnRef::default())
    }
}

impl<T: FromValue> ResultSetHandler for ColumnListHandler<T> {
    type Output = Vec<T>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Vec<T>> {
        let mut values = Vec::new();
        while rs.next()? {
            let index = self.column.resolve(rs)?;
            values.push(rs.get(index)?);
        }
        Ok(values)
    }
}
