//! SQLite driver built on sqlx.
//!
//! sqlx is asynchronous while the runner's driver traits are not, so the
//! source owns a small tokio runtime and every database call blocks on it.
//! Calling into the driver from inside an async task is therefore not
//! allowed; run it from plain threads or from `spawn_blocking`, which is what
//! [`AsyncQueryRunner`](crate::db::AsyncQueryRunner) does.
//!
//! Results are fetched eagerly into [`MemoryResultSet`]s. SQLite cannot
//! describe placeholder types, so parameter metadata is reported as
//! unsupported. It has no stored procedures either; callable statements run
//! their SQL like a prepared statement and do not support OUT parameters.
//! A callable statement may hold several `;`-separated statements, each of
//! which becomes one result: a result set when the statement has result
//! columns, an update count otherwise.

use crate::config::FetchDirection;
use crate::db::driver::{
    CallableStatement, Column, Connection, ConnectionSource, GeneratedKeys, ParameterMetadata,
    PreparedStatement, ResultSet, Statement, StatementBase,
};
use crate::db::memory::MemoryResultSet;
use crate::error::{DbError, DbResult};
use crate::models::{SqlType, Value, ValueKind};
use chrono::NaiveDateTime;
use futures_util::{StreamExt, TryStreamExt};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{Column as _, Either, Execute, Executor, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::VecDeque;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, EnterGuard, Runtime};
use tracing::{debug, trace};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Label of the generated-key column.
pub const GENERATED_KEY_COLUMN: &str = "last_insert_rowid";

// =============================================================================
// Runtime bridge
// =============================================================================

/// Runtime driving the sqlx futures of one source and its connections.
struct DriverRuntime(Option<Runtime>);

impl DriverRuntime {
    fn new() -> DbResult<Self> {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("query-runner-sqlite")
            .enable_all()
            .build()
            .map(|rt| Self(Some(rt)))
            .map_err(|e| DbError::internal(format!("Failed to start SQLite runtime: {}", e)))
    }

    fn runtime(&self) -> DbResult<&Runtime> {
        self.0
            .as_ref()
            .ok_or_else(|| DbError::internal("SQLite runtime is shut down"))
    }

    fn block_on<F: Future>(&self, fut: F) -> DbResult<F::Output> {
        Ok(self.runtime()?.block_on(fut))
    }

    /// Enter the runtime context, for dropping sqlx objects that spawn on drop.
    fn enter(&self) -> Option<EnterGuard<'_>> {
        self.0.as_ref().map(|rt| rt.enter())
    }
}

impl Drop for DriverRuntime {
    fn drop(&mut self) {
        // Dropping may happen inside another runtime, where a blocking
        // shutdown would panic.
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

/// Block on a sqlx future, bounded by `timeout` when set.
fn run<T, F>(
    runtime: &DriverRuntime,
    timeout: Option<Duration>,
    operation: &str,
    fut: F,
) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout {
        Some(limit) => {
            match runtime.block_on(async move { tokio::time::timeout(limit, fut).await })? {
                Ok(result) => result.map_err(DbError::from),
                Err(_) => Err(DbError::timeout(operation, limit.as_secs())),
            }
        }
        None => runtime.block_on(fut)?.map_err(DbError::from),
    }
}

// =============================================================================
// Connection source
// =============================================================================

/// Connection source backed by a sqlx SQLite pool.
pub struct SqliteSource {
    pool: Option<SqlitePool>,
    runtime: Arc<DriverRuntime>,
}

impl SqliteSource {
    /// Open a pool for `url`, e.g. `sqlite:data.db?mode=rwc` or `sqlite::memory:`.
    ///
    /// Blocks; must not be called from inside an async task. Use
    /// [`SqliteSource::open`] there.
    pub fn connect(url: &str) -> DbResult<Self> {
        Self::connect_with(parse_options(url)?, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> DbResult<Self> {
        let runtime = DriverRuntime::new()?;
        let pool = runtime.block_on(open_pool(options, max_connections))??;
        Ok(Self::from_parts(pool, runtime))
    }

    /// Async counterpart of [`SqliteSource::connect`].
    pub async fn open(url: &str) -> DbResult<Self> {
        let options = parse_options(url)?;
        let runtime = DriverRuntime::new()?;
        let pool = runtime
            .runtime()?
            .spawn(open_pool(options, DEFAULT_MAX_CONNECTIONS))
            .await
            .map_err(|e| DbError::internal(format!("Failed to open SQLite pool: {}", e)))??;
        Ok(Self::from_parts(pool, runtime))
    }

    fn from_parts(pool: SqlitePool, runtime: DriverRuntime) -> Self {
        debug!(
            max_connections = pool.options().get_max_connections(),
            "SQLite pool opened"
        );
        Self {
            pool: Some(pool),
            runtime: Arc::new(runtime),
        }
    }

    /// Check out a connection as its concrete type.
    pub fn connection(&self) -> DbResult<SqliteConnection> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::connection("Connection pool is closed", "Reconnect to the database"))?;
        let conn = self.runtime.block_on(pool.acquire())??;
        trace!("Acquired SQLite connection");
        Ok(SqliteConnection {
            conn: Some(conn),
            runtime: Arc::clone(&self.runtime),
        })
    }
}

impl ConnectionSource for SqliteSource {
    fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(self.connection()?))
    }
}

impl Drop for SqliteSource {
    fn drop(&mut self) {
        let _guard = self.runtime.enter();
        self.pool.take();
    }
}

fn parse_options(url: &str) -> DbResult<SqliteConnectOptions> {
    SqliteConnectOptions::from_str(url).map_err(|e| {
        DbError::connection(
            format!("Invalid SQLite connection string: {}", e),
            "Check the connection URL format: sqlite:path/to/db.sqlite",
        )
    })
}

async fn open_pool(options: SqliteConnectOptions, max_connections: u32) -> DbResult<SqlitePool> {
    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
        // An in-memory database lives only as long as one of its connections.
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite",
            )
        })
}

// =============================================================================
// Connection
// =============================================================================

/// A pooled SQLite connection. Closing it returns it to the pool.
pub struct SqliteConnection {
    conn: Option<PoolConnection<Sqlite>>,
    runtime: Arc<DriverRuntime>,
}

impl SqliteConnection {
    fn statement(&mut self, sql: Option<&str>, keys: GeneratedKeys) -> DbResult<SqliteStatement<'_>> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            DbError::connection("Connection is closed", "Acquire a new connection")
        })?;
        Ok(SqliteStatement::new(
            &mut **conn,
            &self.runtime,
            sql.map(str::to_string),
            keys,
        ))
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _guard = self.runtime.enter();
            drop(conn);
        }
    }
}

impl Connection for SqliteConnection {
    fn create_statement(&mut self) -> DbResult<Box<dyn Statement + '_>> {
        Ok(Box::new(self.statement(None, GeneratedKeys::NotRequested)?))
    }

    fn prepare_statement(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> DbResult<Box<dyn PreparedStatement + '_>> {
        Ok(Box::new(self.statement(Some(sql), keys)?))
    }

    fn prepare_call(&mut self, sql: &str) -> DbResult<Box<dyn CallableStatement + '_>> {
        Ok(Box::new(self.statement(Some(sql), GeneratedKeys::NotRequested)?))
    }

    fn close(&mut self) -> DbResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Statements
// =============================================================================

/// One result of a callable statement.
enum Pending {
    Rows(MemoryResultSet),
    Count(u64),
}

/// Plain, prepared and callable statement in one.
pub struct SqliteStatement<'c> {
    conn: &'c mut sqlx::SqliteConnection,
    runtime: &'c DriverRuntime,
    /// SQL of a prepared or callable statement.
    sql: Option<String>,
    keys: GeneratedKeys,
    bindings: Vec<Value>,
    batch: Vec<Vec<Value>>,
    generated: Vec<i64>,
    /// Results of the last call not reached yet.
    results: VecDeque<Pending>,
    current: Option<Pending>,
    max_rows: Option<u64>,
    max_field_size: Option<u32>,
    timeout: Option<Duration>,
    closed: bool,
}

impl<'c> SqliteStatement<'c> {
    fn new(
        conn: &'c mut sqlx::SqliteConnection,
        runtime: &'c DriverRuntime,
        sql: Option<String>,
        keys: GeneratedKeys,
    ) -> Self {
        Self {
            conn,
            runtime,
            sql,
            keys,
            bindings: Vec::new(),
            batch: Vec::new(),
            generated: Vec::new(),
            results: VecDeque::new(),
            current: None,
            max_rows: None,
            max_field_size: None,
            timeout: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::execution("Statement is closed", None));
        }
        Ok(())
    }

    fn prepared_sql(sql: &Option<String>) -> DbResult<&str> {
        sql.as_deref()
            .ok_or_else(|| DbError::unsupported("executing a plain statement without SQL"))
    }

    fn bind_slot(&mut self, index: usize) -> DbResult<&mut Value> {
        if index == 0 {
            return Err(DbError::binding_at(index, "Parameter indexes start at 1"));
        }
        if self.bindings.len() < index {
            self.bindings.resize(index, Value::Null);
        }
        Ok(&mut self.bindings[index - 1])
    }

    fn record_keys(&mut self, result: &SqliteQueryResult) {
        if self.keys == GeneratedKeys::Requested && result.rows_affected() > 0 {
            self.generated.push(result.last_insert_rowid());
        }
    }

    fn fetch(&mut self, sql: Option<&str>) -> DbResult<MemoryResultSet> {
        self.ensure_open()?;
        let max_rows = self.max_rows;
        let rows = match sql {
            Some(sql) => run(
                self.runtime,
                self.timeout,
                "query execution",
                fetch_rows(&mut *self.conn, sql, max_rows),
            )?,
            None => {
                let sql = Self::prepared_sql(&self.sql)?;
                let query = build_query(sql, &self.bindings);
                run(
                    self.runtime,
                    self.timeout,
                    "query execution",
                    fetch_rows(&mut *self.conn, query, max_rows),
                )?
            }
        };
        to_result_set(&rows, self.max_field_size)
    }
}

impl StatementBase for SqliteStatement<'_> {
    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DbResult<()> {
        trace!(%direction, "SQLite ignores fetch direction");
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> DbResult<()> {
        trace!(rows, "SQLite ignores fetch size");
        Ok(())
    }

    fn set_max_field_size(&mut self, bytes: u32) -> DbResult<()> {
        self.max_field_size = Some(bytes).filter(|b| *b > 0);
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DbResult<()> {
        self.max_rows = Some(rows).filter(|r| *r > 0);
        Ok(())
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DbResult<()> {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        Ok(())
    }

    fn generated_keys(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
        self.ensure_open()?;
        if self.keys != GeneratedKeys::Requested {
            return Err(DbError::execution(
                "Generated keys were not requested when the statement was created",
                None,
            ));
        }
        let rows = self.generated.iter().map(|id| vec![Value::Int(*id)]).collect();
        Ok(Box::new(MemoryResultSet::new(
            vec![Column::new(GENERATED_KEY_COLUMN, "INTEGER")],
            rows,
        )))
    }

    fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.bindings.clear();
        self.batch.clear();
        self.results.clear();
        self.current = None;
        Ok(())
    }
}

impl Statement for SqliteStatement<'_> {
    fn execute_query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>> {
        Ok(Box::new(self.fetch(Some(sql))?))
    }

    fn execute_update(&mut self, sql: &str, keys: GeneratedKeys) -> DbResult<u64> {
        self.ensure_open()?;
        self.keys = keys;
        self.generated.clear();
        let result = run(
            self.runtime,
            self.timeout,
            "update",
            Executor::execute(&mut *self.conn, sql),
        )?;
        self.record_keys(&result);
        Ok(result.rows_affected())
    }
}

impl PreparedStatement for SqliteStatement<'_> {
    fn parameter_metadata(&mut self) -> DbResult<Box<dyn ParameterMetadata>> {
        Err(DbError::unsupported("SQLite parameter metadata"))
    }

    fn set_value(
        &mut self,
        index: usize,
        value: &Value,
        _sql_type: Option<SqlType>,
    ) -> DbResult<()> {
        self.ensure_open()?;
        *self.bind_slot(index)? = value.clone();
        Ok(())
    }

    fn set_null(&mut self, index: usize, sql_type: SqlType) -> DbResult<()> {
        self.ensure_open()?;
        // SQLite nulls carry no type.
        trace!(index, ?sql_type, "Binding SQLite null");
        *self.bind_slot(index)? = Value::Null;
        Ok(())
    }

    fn add_batch(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.batch.push(self.bindings.clone());
        Ok(())
    }

    fn execute_query(&mut self) -> DbResult<Box<dyn ResultSet + '_>> {
        Ok(Box::new(self.fetch(None)?))
    }

    fn execute_update(&mut self) -> DbResult<u64> {
        self.ensure_open()?;
        self.generated.clear();
        let sql = Self::prepared_sql(&self.sql)?;
        let query = build_query(sql, &self.bindings);
        let result = run(
            self.runtime,
            self.timeout,
            "update",
            Executor::execute(&mut *self.conn, query),
        )?;
        self.record_keys(&result);
        Ok(result.rows_affected())
    }

    fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        self.ensure_open()?;
        self.generated.clear();
        let entries = std::mem::take(&mut self.batch);
        let sql = Self::prepared_sql(&self.sql)?;
        let mut counts = Vec::with_capacity(entries.len());
        for values in &entries {
            let query = build_query(sql, values);
            let result = run(
                self.runtime,
                self.timeout,
                "batch",
                Executor::execute(&mut *self.conn, query),
            )?;
            if self.keys == GeneratedKeys::Requested && result.rows_affected() > 0 {
                self.generated.push(result.last_insert_rowid());
            }
            counts.push(result.rows_affected());
        }
        debug!(entries = counts.len(), "SQLite batch executed");
        Ok(counts)
    }
}

impl CallableStatement for SqliteStatement<'_> {
    fn register_out_parameter(&mut self, index: usize, _sql_type: SqlType) -> DbResult<()> {
        Err(DbError::unsupported(format!(
            "OUT parameter {}: SQLite has no stored procedures",
            index
        )))
    }

    fn execute(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        self.results.clear();
        self.current = None;
        let sql = Self::prepared_sql(&self.sql)?;
        let query = build_query(sql, &self.bindings);
        let items: Vec<_> = run(
            self.runtime,
            self.timeout,
            "call",
            Executor::fetch_many(&mut *self.conn, query).try_collect(),
        )?;

        // Each statement streams its rows, then one completion marker.
        let mut outcomes = Vec::new();
        let mut rows = Vec::new();
        for item in items {
            match item {
                Either::Left(done) => {
                    outcomes.push((std::mem::take(&mut rows), done.rows_affected()))
                }
                Either::Right(row) => rows.push(row),
            }
        }

        let statements = split_statements(sql).unwrap_or_default();
        let aligned = statements.len() == outcomes.len();
        if !aligned {
            debug!(
                statements = statements.len(),
                results = outcomes.len(),
                "Could not match call results to statements"
            );
        }
        for (index, (mut rows, affected)) in outcomes.into_iter().enumerate() {
            let result = if !rows.is_empty() {
                if let Some(max) = self.max_rows {
                    rows.truncate(usize::try_from(max).unwrap_or(usize::MAX));
                }
                Pending::Rows(to_result_set(&rows, self.max_field_size)?)
            } else {
                // No rows: only the statement's own columns tell a query
                // from an update. A statement that no longer prepares once run,
                // such as CREATE TABLE, is an update.
                let described = match statements.get(index).filter(|_| aligned) {
                    Some(statement) => run(
                        self.runtime,
                        self.timeout,
                        "call",
                        Executor::describe(&mut *self.conn, statement.as_str()),
                    )
                    .map(|described| {
                        described
                            .columns()
                            .iter()
                            .map(|col| Column::new(col.name(), col.type_info().name()))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_else(|e| {
                        trace!(error = %e, "Call statement not describable after running");
                        Vec::new()
                    }),
                    None => Vec::new(),
                };
                if described.is_empty() {
                    Pending::Count(affected)
                } else {
                    Pending::Rows(MemoryResultSet::new(described, Vec::new()))
                }
            };
            self.results.push_back(result);
        }
        trace!(results = self.results.len(), "SQLite call executed");

        self.more_results()
    }

    fn result_set(&mut self) -> DbResult<Option<Box<dyn ResultSet + '_>>> {
        self.ensure_open()?;
        match self.current.take() {
            Some(Pending::Rows(rs)) => Ok(Some(Box::new(rs))),
            other => {
                self.current = other;
                Ok(None)
            }
        }
    }

    fn more_results(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        self.current = self.results.pop_front();
        Ok(matches!(self.current, Some(Pending::Rows(_))))
    }

    fn update_count(&mut self) -> DbResult<Option<u64>> {
        self.ensure_open()?;
        match self.current {
            Some(Pending::Count(n)) => Ok(Some(n)),
            _ => Ok(None),
        }
    }

    fn out_value(&mut self, index: usize) -> DbResult<Value> {
        Err(DbError::unsupported(format!(
            "OUT parameter {}: SQLite has no stored procedures",
            index
        )))
    }
}

// =============================================================================
// Statement splitting
// =============================================================================

/// Text of each statement in `sql`, in the order SQLite runs them.
///
/// `None` when the SQL does not parse; results then cannot be matched to
/// their statements.
fn split_statements(sql: &str) -> Option<Vec<String>> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => Some(statements.iter().map(ToString::to_string).collect()),
        Err(e) => {
            trace!(error = %e, "Call SQL not split into statements");
            None
        }
    }
}

// =============================================================================
// Binding and decoding
// =============================================================================

fn build_query<'q>(sql: &'q str, values: &'q [Value]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    values.iter().fold(sqlx::query(sql), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(*v),
    }
}

/// Fetch at most `max_rows` rows; the rest are never read from the database.
async fn fetch_rows<'q, E>(
    conn: &mut sqlx::SqliteConnection,
    query: E,
    max_rows: Option<u64>,
) -> Result<Vec<SqliteRow>, sqlx::Error>
where
    E: 'q + Execute<'q, Sqlite>,
{
    let stream = Executor::fetch(conn, query);
    match max_rows {
        Some(max) => {
            stream
                .take(usize::try_from(max).unwrap_or(usize::MAX))
                .try_collect()
                .await
        }
        None => stream.try_collect().await,
    }
}

fn to_result_set(rows: &[SqliteRow], max_field_size: Option<u32>) -> DbResult<MemoryResultSet> {
    let columns: Vec<Column> = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|col| Column::new(col.name(), col.type_info().name()))
                .collect()
        })
        .unwrap_or_default();

    let mut data = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let value = decode_column(row, idx, column.sql_type)?;
            values.push(truncate_field(value, max_field_size));
        }
        data.push(values);
    }
    Ok(MemoryResultSet::new(columns, data))
}

/// Decode by the value's storage class; the declared type only refines
/// integers into booleans and text into timestamps.
fn decode_column(row: &SqliteRow, idx: usize, declared: SqlType) -> DbResult<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => {
            let v: i64 = row.try_get_unchecked(idx)?;
            if declared.value_kind() == ValueKind::Bool {
                Value::Bool(v != 0)
            } else {
                Value::Int(v)
            }
        }
        "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked(idx)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(idx)?),
        _ => {
            if declared.value_kind() == ValueKind::Timestamp {
                if let Ok(ts) = row.try_get_unchecked::<NaiveDateTime, _>(idx) {
                    return Ok(Value::Timestamp(ts));
                }
            }
            Value::Text(row.try_get_unchecked(idx)?)
        }
    };
    Ok(value)
}

/// Cut character and binary values to `max` bytes. Text is cut on a
/// character boundary.
fn truncate_field(value: Value, max: Option<u32>) -> Value {
    let Some(max) = max else {
        return value;
    };
    let max = max as usize;
    match value {
        Value::Text(mut s) if s.len() > max => {
            let mut end = max;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            s.truncate(end);
            Value::Text(s)
        }
        Value::Bytes(mut b) => {
            b.truncate(max);
            Value::Bytes(b)
        }
        other => other,
    }
}
