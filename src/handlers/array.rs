//! Handlers producing rows as value arrays.

use crate::db::ResultSet;
use crate::error::DbResult;
use crate::handlers::ResultSetHandler;
use crate::handlers::row::{BasicRowProcessor, RowProcessor};
use crate::models::Value;

/// The first row as an array of values; empty when there are no rows.
#[derive(Debug, Clone, Default)]
pub struct ArrayHandler<P = BasicRowProcessor> {
    processor: P,
}

impl ArrayHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: RowProcessor> ArrayHandler<P> {
    pub fn with_processor(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: RowProcessor> ResultSetHandler for ArrayHandler<P> {
    type Output = Vec<Value>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Vec<Value>> {
        if rs.next()? {
            self.processor.to_array(rs)
        } else {
            Ok(Vec::new())
        }
    }
}

/// Every row as an array of values.
#[derive(Debug, Clone, Default)]
pub struct ArrayListHandler<P = BasicRowProcessor> {
    processor: P,
}

impl ArrayListHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: RowProcessor> ArrayListHandler<P> {
    pub fn with_processor(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: RowProcessor> ResultSetHandler for ArrayListHandler<P> {
    type Output = Vec<Vec<Value>>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while rs.next()? {
            rows.push(self.processor.to_array(rs)?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Column;
    use crate::db::memory::MemoryResultSet;

    fn rows(n: i64) -> MemoryResultSet {
        MemoryResultSet::new(
            vec![Column::new("id", "INTEGER"), Column::new("name", "TEXT")],
            (1..=n)
                .map(|i| vec![Value::Int(i), Value::from(format!("n{}", i))])
                .collect(),
        )
    }

    #[test]
    fn test_array_handler_first_row() {
        let mut rs = rows(2);
        let row = ArrayHandler::new().handle(&mut rs).unwrap();
        assert_eq!(row, vec![Value::Int(1), Value::from("n1")]);
    }

    #[test]
    fn test_array_handler_empty() {
        let mut rs = rows(0);
        assert!(ArrayHandler::new().handle(&mut rs).unwrap().is_empty());
    }

    #[test]
    fn test_array_list_handler() {
        let mut rs = rows(3);
        let all = ArrayListHandler::new().handle(&mut rs).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], vec![Value::Int(3), Value::from("n3")]);
    }
}
