//! Parameter binding.
//!
//! Values are bound positionally, 1-indexed. When the driver can describe a
//! statement's placeholders the declared types drive the bind and the
//! placeholder count is checked against the number of values supplied. The
//! first time a driver fails to describe its placeholders the binder stops
//! asking for the rest of its life.

use crate::db::driver::{CallableStatement, ParameterMetadata, PreparedStatement};
use crate::error::{DbError, DbResult};
use crate::models::{Param, SqlType, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

/// Binds parameter values to prepared statements.
///
/// Shared by every operation of a runner. The "known broken" latch only ever
/// moves from false to true; two threads racing on it can each make one
/// metadata attempt, which is harmless, so relaxed ordering is enough.
#[derive(Debug, Default)]
pub struct ParameterBinder {
    pmd_known_broken: AtomicBool,
}

impl ParameterBinder {
    pub fn new(pmd_known_broken: bool) -> Self {
        Self {
            pmd_known_broken: AtomicBool::new(pmd_known_broken),
        }
    }

    /// Whether parameter metadata is no longer consulted.
    pub fn is_metadata_broken(&self) -> bool {
        self.pmd_known_broken.load(Ordering::Relaxed)
    }

    fn mark_broken(&self, err: &DbError) {
        if !self.pmd_known_broken.swap(true, Ordering::Relaxed) {
            warn!(error = %err, "Parameter metadata unavailable, binding without it from now on");
        }
    }

    /// Fetch placeholder metadata for `stmt`, unless the latch has tripped.
    ///
    /// A failure trips the latch and yields `None`.
    pub fn metadata<S>(&self, stmt: &mut S) -> Option<Box<dyn ParameterMetadata>>
    where
        S: PreparedStatement + ?Sized,
    {
        if self.is_metadata_broken() {
            return None;
        }
        match stmt.parameter_metadata() {
            Ok(pmd) => Some(pmd),
            Err(e) => {
                self.mark_broken(&e);
                None
            }
        }
    }

    /// Declared type of the placeholder at `index`, tripping the latch when
    /// the metadata cannot answer.
    fn declared_type(&self, pmd: Option<&dyn ParameterMetadata>, index: usize) -> Option<SqlType> {
        let pmd = pmd.filter(|_| !self.is_metadata_broken())?;
        match pmd.parameter_type(index) {
            Ok(sql_type) => Some(sql_type),
            Err(e) => {
                self.mark_broken(&e);
                None
            }
        }
    }

    /// Compare the described placeholder count with the number of values.
    fn check_count(&self, pmd: Option<&dyn ParameterMetadata>, given: usize) -> DbResult<()> {
        let Some(pmd) = pmd.filter(|_| !self.is_metadata_broken()) else {
            return Ok(());
        };
        match pmd.parameter_count() {
            Ok(expected) if expected != given => Err(DbError::binding(format!(
                "Wrong number of parameters: expected {}, was given {}",
                expected, given
            ))),
            Ok(_) => Ok(()),
            Err(e) => {
                self.mark_broken(&e);
                Ok(())
            }
        }
    }

    fn bind_value<S>(
        &self,
        stmt: &mut S,
        pmd: Option<&dyn ParameterMetadata>,
        index: usize,
        value: &Value,
    ) -> DbResult<()>
    where
        S: PreparedStatement + ?Sized,
    {
        let declared = self.declared_type(pmd, index);
        if value.is_null() {
            let sql_type = declared.unwrap_or(SqlType::Varchar);
            trace!(index, ?sql_type, "Binding null");
            stmt.set_null(index, sql_type)
        } else {
            stmt.set_value(index, value, declared)
        }
    }

    /// Bind `values` to the placeholders of `stmt`.
    pub fn bind_values<S>(
        &self,
        stmt: &mut S,
        pmd: Option<&dyn ParameterMetadata>,
        values: &[Value],
    ) -> DbResult<()>
    where
        S: PreparedStatement + ?Sized,
    {
        self.check_count(pmd, values.len())?;
        for (i, value) in values.iter().enumerate() {
            self.bind_value(stmt, pmd, i + 1, value)?;
        }
        Ok(())
    }

    /// Bind call parameters. OUT markers are registered for output and their
    /// IN value, if any, is bound as well.
    pub fn bind_params<S>(
        &self,
        stmt: &mut S,
        pmd: Option<&dyn ParameterMetadata>,
        params: &[Param],
    ) -> DbResult<()>
    where
        S: CallableStatement + ?Sized,
    {
        self.check_count(pmd, params.len())?;
        for (i, param) in params.iter().enumerate() {
            let index = i + 1;
            match param {
                Param::In(value) => self.bind_value(stmt, pmd, index, value)?,
                Param::Out(out) => {
                    stmt.register_out_parameter(index, out.sql_type())?;
                    if let Some(value) = out.in_value() {
                        self.bind_value(stmt, pmd, index, value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchDirection;
    use crate::db::driver::{ResultSet, StatementBase, StaticParameterMetadata};
    use crate::models::OutParameter;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Value(usize, Value, Option<SqlType>),
        Null(usize, SqlType),
        Register(usize, SqlType),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        metadata: Option<Vec<SqlType>>,
        metadata_requests: usize,
    }

    impl StatementBase for Recorder {
        fn set_fetch_direction(&mut self, _: FetchDirection) -> DbResult<()> {
            Ok(())
        }
        fn set_fetch_size(&mut self, _: u32) -> DbResult<()> {
            Ok(())
        }
        fn set_max_field_size(&mut self, _: u32) -> DbResult<()> {
            Ok(())
        }
        fn set_max_rows(&mut self, _: u64) -> DbResult<()> {
            Ok(())
        }
        fn set_query_timeout(&mut self, _: Duration) -> DbResult<()> {
            Ok(())
        }
        fn generated_keys(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
            Err(DbError::unsupported("generated keys"))
        }
        fn close(&mut self) -> DbResult<()> {
            Ok(())
        }
    }

    impl PreparedStatement for Recorder {
        fn parameter_metadata(&mut self) -> DbResult<Box<dyn ParameterMetadata>> {
            self.metadata_requests += 1;
            match &self.metadata {
                Some(types) => Ok(Box::new(StaticParameterMetadata::new(types.clone()))),
                None => Err(DbError::unsupported("parameter metadata")),
            }
        }
        fn set_value(&mut self, index: usize, value: &Value, sql_type: Option<SqlType>) -> DbResult<()> {
            self.calls.push(Call::Value(index, value.clone(), sql_type));
            Ok(())
        }
        fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
            self.calls.push(Call::Null(index, sql_type));
            Ok(())
        }
        fn add_batch(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn execute_query(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
            Err(DbError::unsupported("query"))
        }
        fn execute_update(&mut self) -> DbResult<u64> {
            Ok(0)
        }
        fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
            Ok(Vec::new())
        }
    }

    impl CallableStatement for Recorder {
        fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
            self.calls.push(Call::Register(index, sql_type));
            Ok(())
        }
        fn execute(&mut self) -> DbResult<bool> {
            Ok(false)
        }
        fn result_set(&mut self) -> DbResult<Option<Box<dyn ResultSet + '_>>> {
            Ok(None)
        }
        fn more_results(&mut self) -> DbResult<bool> {
            Ok(false)
        }
        fn update_count(&mut self) -> DbResult<Option<u64>> {
            Ok(None)
        }
        fn out_value(&mut self, _: usize) -> DbResult<Value> {
            Ok(Value::Null)
        }
    }

    fn described(types: Vec<SqlType>) -> Recorder {
        Recorder {
            metadata: Some(types),
            ..Default::default()
        }
    }

    #[test]
    fn test_binds_in_order_with_declared_types() {
        let binder = ParameterBinder::default();
        let mut stmt = described(vec![SqlType::Varchar, SqlType::Integer]);
        let pmd = binder.metadata(&mut stmt);
        binder
            .bind_values(&mut stmt, pmd.as_deref(), &[Value::from("unit"), Value::Int(1)])
            .unwrap();
        assert_eq!(
            stmt.calls,
            vec![
                Call::Value(1, Value::from("unit"), Some(SqlType::Varchar)),
                Call::Value(2, Value::Int(1), Some(SqlType::Integer)),
            ]
        );
    }

    #[test]
    fn test_null_uses_declared_type() {
        let binder = ParameterBinder::default();
        let mut stmt = described(vec![SqlType::Integer]);
        let pmd = binder.metadata(&mut stmt);
        binder
            .bind_values(&mut stmt, pmd.as_deref(), &[Value::Null])
            .unwrap();
        assert_eq!(stmt.calls, vec![Call::Null(1, SqlType::Integer)]);
    }

    #[test]
    fn test_wrong_parameter_count() {
        let binder = ParameterBinder::default();
        let mut stmt = described(vec![SqlType::Varchar, SqlType::Varchar]);
        let pmd = binder.metadata(&mut stmt);

        let err = binder
            .bind_values(&mut stmt, pmd.as_deref(), &[Value::from("unit")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Binding error: Wrong number of parameters: expected 2, was given 1"
        );

        let err = binder
            .bind_values(
                &mut stmt,
                pmd.as_deref(),
                &[Value::from("a"), Value::from("b"), Value::from("c")],
            )
            .unwrap_err();
        assert!(err.to_string().contains("expected 2, was given 3"));
        assert!(stmt.calls.is_empty());
    }

    #[test]
    fn test_metadata_failure_latches() {
        let binder = ParameterBinder::default();
        let mut stmt = Recorder::default();

        assert!(binder.metadata(&mut stmt).is_none());
        assert!(binder.is_metadata_broken());
        assert!(binder.metadata(&mut stmt).is_none());
        assert_eq!(stmt.metadata_requests, 1);

        binder
            .bind_values(&mut stmt, None, &[Value::Null, Value::Int(3)])
            .unwrap();
        assert_eq!(
            stmt.calls,
            vec![Call::Null(1, SqlType::Varchar), Call::Value(2, Value::Int(3), None)]
        );
    }

    #[test]
    fn test_known_broken_never_asks() {
        let binder = ParameterBinder::new(true);
        let mut stmt = described(vec![SqlType::Integer]);
        assert!(binder.metadata(&mut stmt).is_none());
        assert_eq!(stmt.metadata_requests, 0);
    }

    #[test]
    fn test_type_lookup_failure_latches() {
        let binder = ParameterBinder::default();
        let mut stmt = Recorder::default();
        // Count says one placeholder, but the type table is empty.
        struct CountOnly;
        impl ParameterMetadata for CountOnly {
            fn parameter_count(&self) -> DbResult<usize> {
                Ok(1)
            }
            fn parameter_type(&self, index: usize) -> DbResult<SqlType> {
                Err(DbError::binding_at(index, "no type"))
            }
        }
        binder
            .bind_values(&mut stmt, Some(&CountOnly as &dyn ParameterMetadata), &[Value::Null])
            .unwrap();
        assert!(binder.is_metadata_broken());
        assert_eq!(stmt.calls, vec![Call::Null(1, SqlType::Varchar)]);
    }

    #[test]
    fn test_bind_params_registers_out_markers() {
        let binder = ParameterBinder::new(true);
        let mut stmt = Recorder::default();
        let params = vec![
            Param::from("x"),
            Param::from(OutParameter::new(SqlType::Integer)),
            Param::from(OutParameter::inout(SqlType::Varchar, "in")),
        ];
        binder.bind_params(&mut stmt, None, &params).unwrap();
        assert_eq!(
            stmt.calls,
            vec![
                Call::Value(1, Value::from("x"), None),
                Call::Register(2, SqlType::Integer),
                Call::Register(3, SqlType::Varchar),
                Call::Value(3, Value::from("in"), None),
            ]
        );
    }
}
