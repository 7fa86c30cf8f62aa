//! Recording mock driver shared by the integration tests.
//!
//! Every driver call is written to a [`Log`] so tests can check exactly what
//! the runner bound, configured and closed. Failures, parameter metadata,
//! OUT values and call results are scripted through [`Behavior`].

#![allow(dead_code)]

use query_runner::config::FetchDirection;
use query_runner::db::{
    CallableStatement, Column, Connection, ConnectionSource, GeneratedKeys, MemoryResultSet,
    ParameterMetadata, PreparedStatement, ResultSet, Statement, StatementBase,
    StaticParameterMetadata,
};
use query_runner::error::{DbError, DbResult};
use query_runner::models::{SqlType, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Driver step that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Acquire,
    Prepare,
    Configure,
    Execute,
    AddBatch,
    ExecuteBatch,
    OutValue,
    CloseResultSet,
    CloseStatement,
    CloseConnection,
}

/// Everything the driver was asked to do.
#[derive(Debug, Default)]
pub struct Log {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub plain_statements: usize,
    pub prepared_statements: usize,
    pub callable_statements: usize,
    pub statements_closed: usize,
    pub result_sets_opened: usize,
    pub result_sets_closed: usize,
    pub metadata_requests: usize,
    pub options: Vec<String>,
    pub values: Vec<(usize, Value, Option<SqlType>)>,
    pub nulls: Vec<(usize, SqlType)>,
    pub registered: Vec<(usize, SqlType)>,
    pub batches_added: usize,
    pub batches_executed: usize,
    pub executed: Vec<String>,
    pub keys_requested: Vec<GeneratedKeys>,
}

/// Scripted driver responses.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Placeholder types reported as metadata; `None` makes metadata fail.
    pub metadata: Option<Vec<SqlType>>,
    pub fail: Vec<Step>,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    /// Result sets produced by a call. The n-th one (from 1) holds a single
    /// `seq` column with the rows `n` and `n * 10`.
    pub call_result_sets: usize,
    pub update_count: Option<u64>,
    pub out_values: HashMap<usize, Value>,
    pub keys: Vec<i64>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            metadata: Some(Vec::new()),
            fail: Vec::new(),
            columns: vec![Column::new("id", "INTEGER"), Column::new("name", "VARCHAR")],
            rows: vec![
                vec![Value::Int(1), Value::from("one")],
                vec![Value::Int(2), Value::from("two")],
            ],
            call_result_sets: 0,
            update_count: Some(1),
            out_values: HashMap::new(),
            keys: Vec::new(),
        }
    }
}

impl Behavior {
    pub fn with_metadata(mut self, types: Vec<SqlType>) -> Self {
        self.metadata = Some(types);
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata = None;
        self
    }

    pub fn failing(mut self, step: Step) -> Self {
        self.fail.push(step);
        self
    }

    fn fails(&self, step: Step) -> DbResult<()> {
        if self.fail.contains(&step) {
            return Err(DbError::execution(format!("{:?} failed", step), None));
        }
        Ok(())
    }
}

/// Handle on the mock database: its script and its log.
#[derive(Clone, Default)]
pub struct MockDb {
    log: Arc<Mutex<Log>>,
    behavior: Arc<Behavior>,
}

impl MockDb {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            behavior: Arc::new(behavior),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }

    pub fn connection(&self) -> MockConnection {
        self.log().connections_opened += 1;
        MockConnection { db: self.clone() }
    }

    pub fn source(&self) -> Arc<dyn ConnectionSource> {
        Arc::new(self.clone())
    }

    fn statement(&self, sql: Option<&str>) -> MockStatement {
        MockStatement {
            db: self.clone(),
            sql: sql.map(str::to_string),
            produced_results: 0,
            current: None,
        }
    }

    fn result_set(&self) -> MockResultSet {
        self.open_result_set(MemoryResultSet::new(
            self.behavior.columns.clone(),
            self.behavior.rows.clone(),
        ))
    }

    fn call_result_set(&self, n: i64) -> MockResultSet {
        self.open_result_set(MemoryResultSet::new(
            vec![Column::new("seq", "INTEGER")],
            vec![vec![Value::Int(n)], vec![Value::Int(n * 10)]],
        ))
    }

    fn open_result_set(&self, inner: MemoryResultSet) -> MockResultSet {
        self.log().result_sets_opened += 1;
        MockResultSet {
            db: self.clone(),
            inner,
        }
    }
}

impl ConnectionSource for MockDb {
    fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        self.behavior.fails(Step::Acquire)?;
        Ok(Box::new(self.connection()))
    }
}

pub struct MockConnection {
    db: MockDb,
}

impl Connection for MockConnection {
    fn create_statement(&mut self) -> DbResult<Box<dyn Statement + '_>> {
        self.db.behavior.fails(Step::Prepare)?;
        self.db.log().plain_statements += 1;
        Ok(Box::new(self.db.statement(None)))
    }

    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> DbResult<Box<dyn PreparedStatement + '_>> {
        self.db.behavior.fails(Step::Prepare)?;
        let mut log = self.db.log();
        log.prepared_statements += 1;
        log.keys_requested.push(keys);
        drop(log);
        Ok(Box::new(self.db.statement(Some(sql))))
    }

    fn prepare_call(&mut self, sql: &str) -> DbResult<Box<dyn CallableStatement + '_>> {
        self.db.behavior.fails(Step::Prepare)?;
        self.db.log().callable_statements += 1;
        Ok(Box::new(self.db.statement(Some(sql))))
    }

    fn close(&mut self) -> DbResult<()> {
        self.db.log().connections_closed += 1;
        self.db.behavior.fails(Step::CloseConnection)
    }
}

pub struct MockStatement {
    db: MockDb,
    sql: Option<String>,
    produced_results: usize,
    current: Option<MockResultSet>,
}

impl MockStatement {
    fn option(&self, option: String) -> DbResult<()> {
        self.db.behavior.fails(Step::Configure)?;
        self.db.log().options.push(option);
        Ok(())
    }

    fn record_execution(&self, sql: &str) -> DbResult<()> {
        self.db.behavior.fails(Step::Execute)?;
        self.db.log().executed.push(sql.to_string());
        Ok(())
    }

    fn own_sql(&self) -> String {
        self.sql.clone().unwrap_or_default()
    }
}

impl StatementBase for MockStatement {
    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DbResult<()> {
        self.option(format!("fetch_direction={}", direction))
    }

    fn set_fetch_size(&mut self, rows: u32) -> DbResult<()> {
        self.option(format!("fetch_size={}", rows))
    }

    fn set_max_field_size(&mut self, bytes: u32) -> DbResult<()> {
        self.option(format!("max_field_size={}", bytes))
    }

    fn set_max_rows(&mut self, rows: u64) -> DbResult<()> {
        self.option(format!("max_rows={}", rows))
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DbResult<()> {
        self.option(format!("query_timeout={}", timeout.as_secs()))
    }

    fn generated_keys(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
        self.db.log().result_sets_opened += 1;
        let rows = self.db.behavior.keys.iter().map(|k| vec![Value::Int(*k)]).collect();
        Ok(Box::new(MockResultSet {
            db: self.db.clone(),
            inner: MemoryResultSet::new(vec![Column::new("id", "INTEGER")], rows),
        }))
    }

    fn close(&mut self) -> DbResult<()> {
        self.db.log().statements_closed += 1;
        self.db.behavior.fails(Step::CloseStatement)
    }
}

impl Statement for MockStatement {
    fn execute_query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>> {
        self.record_execution(sql)?;
        Ok(Box::new(self.db.result_set()))
    }

    fn execute_update(&mut self, sql: &str, keys: GeneratedKeys) -> DbResult<u64> {
        self.record_execution(sql)?;
        self.db.log().keys_requested.push(keys);
        Ok(self.db.behavior.update_count.unwrap_or(0))
    }
}

impl PreparedStatement for MockStatement {
    fn parameter_metadata(&mut self) -> DbResult<Box<dyn ParameterMetadata>> {
        self.db.log().metadata_requests += 1;
        match &self.db.behavior.metadata {
            Some(types) => Ok(Box::new(StaticParameterMetadata::new(types.clone()))),
            None => Err(DbError::unsupported("parameter metadata")),
        }
    }

    fn set_value(&mut self, index: usize, value: &Value, sql_type: Option<SqlType>) -> DbResult<()> {
        self.db.log().values.push((index, value.clone(), sql_type));
        Ok(())
    }

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.db.log().nulls.push((index, sql_type));
        Ok(())
    }

    fn add_batch(&mut self) -> DbResult<()> {
        self.db.behavior.fails(Step::AddBatch)?;
        self.db.log().batches_added += 1;
        Ok(())
    }

    fn execute_query(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
        self.record_execution(&self.own_sql())?;
        Ok(Box::new(self.db.result_set()))
    }

    fn execute_update(&mut self) -> DbResult<u64> {
        self.record_execution(&self.own_sql())?;
        Ok(self.db.behavior.update_count.unwrap_or(0))
    }

    fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        self.db.behavior.fails(Step::ExecuteBatch)?;
        let mut log = self.db.log();
        let entries = log.batches_added;
        log.batches_executed += 1;
        Ok(vec![1; entries])
    }
}

impl CallableStatement for MockStatement {
    fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.db.log().registered.push((index, sql_type));
        Ok(())
    }

    fn execute(&mut self) -> DbResult<bool> {
        self.record_execution(&self.own_sql())?;
        self.produced_results = 0;
        self.more_results()
    }

    fn result_set(&mut self) -> DbResult<Option<Box<dyn ResultSet + '_>>> {
        Ok(self
            .current
            .take()
            .map(|rs| Box::new(rs) as Box<dyn ResultSet + '_>))
    }

    fn more_results(&mut self) -> DbResult<bool> {
        if self.produced_results == self.db.behavior.call_result_sets {
            self.current = None;
            return Ok(false);
        }
        self.produced_results += 1;
        self.current = Some(self.db.call_result_set(self.produced_results as i64));
        Ok(true)
    }

    fn update_count(&mut self) -> DbResult<Option<u64>> {
        if self.current.is_some() {
            return Ok(None);
        }
        Ok(self.db.behavior.update_count)
    }

    fn out_value(&mut self, index: usize) -> DbResult<Value> {
        self.db.behavior.fails(Step::OutValue)?;
        Ok(self
            .db
            .behavior
            .out_values
            .get(&index)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

pub struct MockResultSet {
    db: MockDb,
    inner: MemoryResultSet,
}

impl ResultSet for MockResultSet {
    fn next(&mut self) -> DbResult<bool> {
        self.inner.next()
    }

    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn value(&mut self, index: usize) -> DbResult<Value> {
        self.inner.value(index)
    }

    fn close(&mut self) -> DbResult<()> {
        self.inner.close()?;
        self.db.log().result_sets_closed += 1;
        self.db.behavior.fails(Step::CloseResultSet)
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
