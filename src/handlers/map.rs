//! Handlers producing rows keyed by column label.

use crate::db::ResultSet;
use crate::error::DbResult;
use crate::handlers::ResultSetHandler;
use crate::handlers::row::{BasicRowProcessor, RowMap, RowProcessor};

/// The first row as a [`RowMap`], or `None` when there are no rows.
#[derive(Debug, Clone, Default)]
pub struct MapHandler<P = BasicRowProcessor> {
    processor: P,
}

impl MapHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: RowProcessor> MapHandler<P> {
    pub fn with_processor(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: RowProcessor> ResultSetHandler for MapHandler<P> {
    type Output = Option<RowMap>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Option<RowMap>> {
        if rs.next()? {
            self.processor.to_map(rs).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Every row as a [`RowMap`].
#[derive(Debug, Clone, Default)]
pub struct MapListHandler<P = BasicRowProcessor> {
    processor: P,
}

impl MapListHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: RowProcessor> MapListHandler<P> {
    pub fn with_processor(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: RowProcessor> ResultSetHandler for MapListHandler<P> {
    type Output = Vec<RowMap>;

    fn handle(&self, rs: &mut dyn ResultSet) -> DbResult<Vec<RowMap>> {
        let mut rows = Vec::new();
        while rs.next()? {
            rows.push(self.processor.to_map(rs)?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Column;
    use crate::db::memory::MemoryResultSet;
    use crate::models::Value;

    fn people() -> MemoryResultSet {
        MemoryResultSet::new(
            vec![Column::new("ID", "INTEGER"), Column::new("name", "TEXT")],
            vec![
                vec![Value::Int(1), Value::from("ada")],
                vec![Value::Int(2), Value::Null],
            ],
        )
    }

    #[test]
    fn test_map_handler() {
        let mut rs = people();
        let row = MapHandler::new().handle(&mut rs).unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("NAME"), Some(&Value::from("ada")));
    }

    #[test]
    fn test_map_handler_no_rows() {
        let mut rs = MemoryResultSet::new(vec![Column::new("id", "INTEGER")], vec![]);
        assert!(MapHandler::new().handle(&mut rs).unwrap().is_none());
    }

    #[test]
    fn test_map_list_handler() {
        let mut rs = people();
        let rows = MapListHandler::new().handle(&mut rs).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&Value::Null));
    }
}
