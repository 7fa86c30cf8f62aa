//! Result set wrapping.
//!
//! [`ResultCursor`] is what handlers see. It forwards to the driver's result
//! set until it is closed; after that, advancing reports exhaustion and reads
//! return null instead of failing, so a handler holding on to a cursor that
//! was closed early degrades instead of erroring.

use crate::db::driver::{Column, ResultSet};
use crate::error::DbResult;
use crate::models::Value;
use tracing::warn;

pub struct ResultCursor<'a> {
    inner: Box<dyn ResultSet + 'a>,
    closed: bool,
}

impl<'a> ResultCursor<'a> {
    pub fn new(inner: Box<dyn ResultSet + 'a>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Close the underlying result set. Idempotent: only the first call
    /// reaches the driver.
    pub fn close(&mut self) -> DbResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

impl ResultSet for ResultCursor<'_> {
    fn next(&mut self) -> DbResult<bool> {
        if self.closed {
            return Ok(false);
        }
        self.inner.next()
    }

    fn columns(&self) -> &[Column] {
        if self.closed {
            return &[];
        }
        self.inner.columns()
    }

    fn value(&mut self, index: usize) -> DbResult<Value> {
        if self.closed {
            return Ok(Value::Null);
        }
        self.inner.value(index)
    }

    fn close(&mut self) -> DbResult<()> {
        ResultCursor::close(self)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ResultCursor<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to close result set");
            }
        }
    }
}

/// Iterates the remaining rows of a result set as value arrays.
///
/// Driver failures are yielded as `Err` items; iteration stops after the
/// first one.
pub struct RowIterator<'r, 'a> {
    rs: &'r mut (dyn ResultSet + 'a),
    failed: bool,
}

impl<'r, 'a> RowIterator<'r, 'a> {
    pub fn new(rs: &'r mut (dyn ResultSet + 'a)) -> Self {
        Self { rs, failed: false }
    }

    fn read_row(&mut self) -> DbResult<Option<Vec<Value>>> {
        if !self.rs.next()? {
            return Ok(None);
        }
        let count = self.rs.columns().len();
        let mut row = Vec::with_capacity(count);
        for index in 1..=count {
            row.push(self.rs.value(index)?);
        }
        Ok(Some(row))
    }
}

impl Iterator for RowIterator<'_, '_> {
    type Item = DbResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_row() {
            Ok(row) => row.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
