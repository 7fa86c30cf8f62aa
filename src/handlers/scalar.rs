//! Scalar handler.

use crate::db::ResultSet;
use crate::error::DbResult;
use crate::handlers::ResultSetHandler;
use crate::handlers::column::ColumnRef;
use crate::models::FromValue;
use std::marker::PhantomData;

/// One column of the first row converted to `T`, or `None` when there are
/// no rows. Typical for `SELECT COUNT(*)` and generated keys.
///
/// A SQL null in that column converts like any other value; use
/// `ScalarHandler<Option<T>>` to accept it.
#[derive(Debug, Clone)]
pub struct ScalarHandler<T> {
    column: ColumnRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScalarHandler<T> {
    /// First column.
    pub fn new() -> Self {
        Self::column(ColumnRef::default())
    }

    pub fn column(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ScalarHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromValue> ResultSetHandler for ScalarHandler<T> {
    type Output = Option<T>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Option<T>> {
        if !rs.next()? {
            return Ok(None);
        }
        let index = self.column.resolve(rs)?;
        rs.get(index).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Column;
    use crate::db::memory::MemoryResultSet;
    use crate::models::Value;

    #[test]
    fn test_scalar_first_column() {
        let mut rs = MemoryResultSet::new(
            vec![Column::new("count", "INTEGER")],
            vec![vec![Value::Int(7)]],
        );
        assert_eq!(ScalarHandler::<i64>::new().handle(&mut rs).unwrap(), Some(7));
    }

    #[test]
    fn test_scalar_by_label() {
        let mut rs = MemoryResultSet::new(
            vec![Column::new("a", "TEXT"), Column::new("b", "REAL")],
            vec![vec![Value::from("x"), Value::Float(1.5)]],
        );
        let b = ScalarHandler::<f64>::column("b").handle(&mut rs).unwrap();
        assert_eq!(b, Some(1.5));
    }

    #[test]
    fn test_scalar_no_rows() {
        let mut rs = MemoryResultSet::new(vec![Column::new("a", "TEXT")], vec![]);
        assert_eq!(ScalarHandler::<String>::new().handle(&mut rs).unwrap(), None);
    }

    #[test]
    fn test_scalar_null() {
        let mut rs = MemoryResultSet::new(vec![Column::new("a", "TEXT")], vec![vec![Value::Null]]);
        assert!(ScalarHandler::<String>::new().handle(&mut rs).is_err());
        let mut rs = MemoryResultSet::new(vec![Column::new("a", "TEXT")], vec![vec![Value::Null]]);
        assert_eq!(
            ScalarHandler::<Option<String>>::new().handle(&mut rs).unwrap(),
            Some(None)
        );
    }
}
