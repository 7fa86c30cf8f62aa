//! Buffered result sets.

use crate::db::driver::{Column, ResultSet};
use crate::error::{DbError, DbResult};
use crate::models::Value;

/// A result set whose rows are already materialized in memory.
///
/// Drivers that fetch results eagerly hand these out; they are also handy for
/// generated-key result sets assembled by the driver itself.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSet {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    /// Index of the current row plus one; 0 is "before first".
    position: usize,
    closed: bool,
}

impl MemoryResultSet {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::execution("Result set is closed", None));
        }
        Ok(())
    }
}

impl ResultSet for MemoryResultSet {
    fn next(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            self.position = self.rows.len() + 1;
            Ok(false)
        }
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn value(&mut self, index: usize) -> DbResult<Value> {
        self.ensure_open()?;
        let row = self
            .position
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .ok_or_else(|| DbError::execution("No current row", None))?;
        index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .cloned()
            .ok_or_else(|| {
                DbError::execution(
                    format!(
                        "Column index {} out of bounds (columns: {})",
                        index,
                        row.len()
                    ),
                    None,
                )
            })
    }

    fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryResultSet {
        MemoryResultSet::new(
            vec![Column::new("id", "INTEGER")],
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
        )
    }

    #[test]
    fn test_iterates_rows_in_order() {
        let mut rs = sample();
        let mut seen = Vec::new();
        while rs.next().unwrap() {
            seen.push(rs.value(1).unwrap());
        }
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_value_before_first_row_fails() {
        let mut rs = sample();
        assert!(rs.value(1).is_err());
    }

    #[test]
    fn test_value_out_of_bounds_fails() {
        let mut rs = sample();
        rs.next().unwrap();
        assert!(rs.value(0).is_err());
        assert!(rs.value(2).is_err());
    }

    #[test]
    fn test_closed_result_set_fails() {
        let mut rs = sample();
        rs.close().unwrap();
        assert!(rs.is_closed());
        assert!(rs.next().is_err());
    }
}
