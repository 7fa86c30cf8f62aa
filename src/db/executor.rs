//! Statement execution engine.
//!
//! [`QueryRunner`] runs one statement per call and owns the lifecycle of
//! everything it opens:
//! - Connections acquired from the runner's [`ConnectionSource`] are always
//!   closed; connections passed in by the caller never are
//! - Result sets are closed before their statement, statements before their
//!   connection
//! - Release is attempted on every exit path, and an outer resource is still
//!   released when releasing an inner one failed
//!
//! When an operation fails its own error is reported and any release failure
//! is only logged. When the operation succeeded but a release failed, the
//! release failure is reported.
//!
//! Failures raised while preparing, binding, executing or handling a statement
//! are wrapped once in [`DbError::Statement`] with the SQL text and
//! parameters.

use crate::config::{RunnerOptions, StatementConfig};
use crate::db::binder::ParameterBinder;
use crate::db::cursor::ResultCursor;
use crate::db::driver::{
    CallableStatement, Connection, ConnectionSource, GeneratedKeys, PreparedStatement, ResultSet,
    Statement, StatementBase,
};
use crate::db::outparams::retrieve_out_parameters;
use crate::error::{DbError, DbResult};
use crate::handlers::ResultSetHandler;
use crate::models::{Param, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes SQL statements with pluggable result handling.
///
/// Every operation comes in two forms: one acquiring its connection from the
/// runner's source (`query`, `update`, ...) and one running on a connection
/// supplied by the caller (`query_with`, `update_with`, ...).
///
/// Parameters are bound positionally. Statements without parameters run as
/// plain statements with the literal SQL text.
pub struct QueryRunner {
    source: Option<Arc<dyn ConnectionSource>>,
    statement_config: StatementConfig,
    binder: ParameterBinder,
}

impl Default for QueryRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRunner")
            .field("has_source", &self.source.is_some())
            .field("statement_config", &self.statement_config)
            .field("binder", &self.binder)
            .finish()
    }
}

impl QueryRunner {
    /// A runner without a connection source; only the `*_with` operations
    /// can be used.
    pub fn new() -> Self {
        Self {
            source: None,
            statement_config: StatementConfig::default(),
            binder: ParameterBinder::default(),
        }
    }

    /// A runner acquiring connections from `source`.
    pub fn with_source(source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            source: Some(source),
            ..Self::new()
        }
    }

    /// Apply `config` to every statement this runner creates.
    pub fn with_statement_config(mut self, config: StatementConfig) -> Self {
        self.statement_config = config;
        self
    }

    /// Skip parameter metadata from the start, for drivers known not to
    /// support it.
    pub fn with_pmd_known_broken(mut self, broken: bool) -> Self {
        self.binder = ParameterBinder::new(broken);
        self
    }

    pub fn with_options(self, options: &RunnerOptions) -> Self {
        self.with_statement_config(options.statement)
            .with_pmd_known_broken(options.pmd_known_broken)
    }

    pub fn source(&self) -> Option<&Arc<dyn ConnectionSource>> {
        self.source.as_ref()
    }

    pub fn statement_config(&self) -> &StatementConfig {
        &self.statement_config
    }

    /// Whether parameter metadata is no longer consulted, either because it
    /// was configured so or because the driver failed to provide it.
    pub fn is_pmd_known_broken(&self) -> bool {
        self.binder.is_metadata_broken()
    }

    // ------------------------------------------------------------------
    // query
    // ------------------------------------------------------------------

    /// Run a query and convert its result set with `handler`.
    pub fn query<H: ResultSetHandler>(
        &self,
        sql: &str,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        self.with_connection(|conn| self.query_with(conn, sql, handler, params))
    }

    pub fn query_with<H: ResultSetHandler>(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        debug!(sql = %sql, params = params.len(), "Executing query");

        let result = if params.is_empty() {
            conn.create_statement().and_then(|mut stmt| {
                let result = self.query_plain(stmt.as_mut(), sql, handler);
                release(result, stmt.close(), "statement")
            })
        } else {
            conn.prepare_statement(sql, GeneratedKeys::NotRequested)
                .and_then(|mut stmt| {
                    let result = self.query_prepared(stmt.as_mut(), handler, params);
                    release(result, stmt.close(), "statement")
                })
        };
        result.map_err(|e| e.with_statement(sql, &*params))
    }

    fn query_plain<H: ResultSetHandler>(
        &self,
        stmt: &mut dyn Statement,
        sql: &str,
        handler: &H,
    ) -> DbResult<H::Output> {
        self.configure(stmt)?;
        let rs = stmt.execute_query(sql)?;
        handle_result(rs, handler)
    }

    fn query_prepared<H: ResultSetHandler>(
        &self,
        stmt: &mut dyn PreparedStatement,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        self.configure(stmt)?;
        let pmd = self.binder.metadata(stmt);
        self.binder.bind_values(stmt, pmd.as_deref(), params)?;
        let rs = stmt.execute_query()?;
        handle_result(rs, handler)
    }

    // ------------------------------------------------------------------
    // update
    // ------------------------------------------------------------------

    /// Run an INSERT, UPDATE or DELETE and return the number of rows affected.
    pub fn update(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        require_sql(sql)?;
        self.with_connection(|conn| self.update_with(conn, sql, params))
    }

    pub fn update_with(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<u64> {
        require_sql(sql)?;
        debug!(sql = %sql, params = params.len(), "Executing update");

        let result = if params.is_empty() {
            conn.create_statement().and_then(|mut stmt| {
                let result = self
                    .configure(stmt.as_mut())
                    .and_then(|()| stmt.execute_update(sql, GeneratedKeys::NotRequested));
                release(result, stmt.close(), "statement")
            })
        } else {
            conn.prepare_statement(sql, GeneratedKeys::NotRequested)
                .and_then(|mut stmt| {
                    let result = self.update_prepared(stmt.as_mut(), params);
                    release(result, stmt.close(), "statement")
                })
        };
        result.map_err(|e| e.with_statement(sql, &*params))
    }

    fn update_prepared(&self, stmt: &mut dyn PreparedStatement, params: &[Value]) -> DbResult<u64> {
        self.configure(stmt)?;
        let pmd = self.binder.metadata(stmt);
        self.binder.bind_values(stmt, pmd.as_deref(), params)?;
        stmt.execute_update()
    }

    // ------------------------------------------------------------------
    // batch
    // ------------------------------------------------------------------

    /// Run one statement once per row of `rows` in a single batch. Returns one
    /// update count per row, in row order.
    pub fn batch<R: AsRef<[Value]>>(&self, sql: &str, rows: &[R]) -> DbResult<Vec<u64>> {
        require_sql(sql)?;
        self.with_connection(|conn| self.batch_with(conn, sql, rows))
    }

    pub fn batch_with<R: AsRef<[Value]>>(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        rows: &[R],
    ) -> DbResult<Vec<u64>> {
        require_sql(sql)?;
        debug!(sql = %sql, rows = rows.len(), "Executing batch");

        conn.prepare_statement(sql, GeneratedKeys::NotRequested)
            .and_then(|mut stmt| {
                let result = self
                    .fill_batch(stmt.as_mut(), rows)
                    .and_then(|()| stmt.execute_batch());
                release(result, stmt.close(), "statement")
            })
            .map_err(|e| e.with_statement(sql, describe_rows(rows).as_slice()))
    }

    /// Bind and queue every row. Metadata is fetched once for all of them.
    fn fill_batch<R: AsRef<[Value]>>(
        &self,
        stmt: &mut dyn PreparedStatement,
        rows: &[R],
    ) -> DbResult<()> {
        self.configure(stmt)?;
        let pmd = self.binder.metadata(stmt);
        for row in rows {
            self.binder.bind_values(stmt, pmd.as_deref(), row.as_ref())?;
            stmt.add_batch()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // execute
    // ------------------------------------------------------------------

    /// Run a statement, typically a stored procedure call, that returns no
    /// result sets. Returns the update count reported by the driver, or 0
    /// when it reports none.
    ///
    /// [`Param::Out`] markers are registered as OUT parameters and receive
    /// their values once the call has succeeded.
    pub fn execute(&self, sql: &str, params: &mut [Param]) -> DbResult<u64> {
        require_sql(sql)?;
        self.with_connection(|conn| self.execute_with(conn, sql, params))
    }

    pub fn execute_with(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        params: &mut [Param],
    ) -> DbResult<u64> {
        require_sql(sql)?;
        debug!(sql = %sql, params = params.len(), "Executing call");

        let result = conn.prepare_call(sql).and_then(|mut stmt| {
            let result = self.call_update(stmt.as_mut(), params);
            release(result, stmt.close(), "statement")
        });
        result.map_err(|e| e.with_statement(sql, &*params))
    }

    fn call_update(&self, stmt: &mut dyn CallableStatement, params: &mut [Param]) -> DbResult<u64> {
        self.prepare_call(stmt, params)?;
        stmt.execute()?;
        let rows = stmt.update_count()?.unwrap_or(0);
        retrieve_out_parameters(stmt, params)?;
        Ok(rows)
    }

    /// Run a statement, typically a stored procedure call, that returns any
    /// number of result sets. `handler` converts each of them, in order.
    ///
    /// Each result set is closed before the next one is fetched. OUT
    /// parameters are retrieved after the last one.
    pub fn execute_results<H: ResultSetHandler>(
        &self,
        sql: &str,
        handler: &H,
        params: &mut [Param],
    ) -> DbResult<Vec<H::Output>> {
        require_sql(sql)?;
        self.with_connection(|conn| self.execute_results_with(conn, sql, handler, params))
    }

    pub fn execute_results_with<H: ResultSetHandler>(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        handler: &H,
        params: &mut [Param],
    ) -> DbResult<Vec<H::Output>> {
        require_sql(sql)?;
        debug!(sql = %sql, params = params.len(), "Executing call with results");

        let result = conn.prepare_call(sql).and_then(|mut stmt| {
            let result = self.call_results(stmt.as_mut(), handler, params);
            release(result, stmt.close(), "statement")
        });
        result.map_err(|e| e.with_statement(sql, &*params))
    }

    fn call_results<H: ResultSetHandler>(
        &self,
        stmt: &mut dyn CallableStatement,
        handler: &H,
        params: &mut [Param],
    ) -> DbResult<Vec<H::Output>> {
        self.prepare_call(stmt, params)?;
        let mut results = Vec::new();
        let mut more = stmt.execute()?;
        while more {
            if let Some(rs) = stmt.result_set()? {
                results.push(handle_result(rs, handler)?);
            }
            more = stmt.more_results()?;
        }
        retrieve_out_parameters(stmt, params)?;
        Ok(results)
    }

    fn prepare_call(&self, stmt: &mut dyn CallableStatement, params: &[Param]) -> DbResult<()> {
        self.configure(stmt)?;
        let pmd = self.binder.metadata(stmt);
        self.binder.bind_params(stmt, pmd.as_deref(), params)
    }

    // ------------------------------------------------------------------
    // insert
    // ------------------------------------------------------------------

    /// Run an INSERT and convert the generated keys with `handler`.
    ///
    /// The handler is called exactly once, also when the driver reports no
    /// keys.
    pub fn insert<H: ResultSetHandler>(
        &self,
        sql: &str,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        self.with_connection(|conn| self.insert_with(conn, sql, handler, params))
    }

    pub fn insert_with<H: ResultSetHandler>(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        debug!(sql = %sql, params = params.len(), "Executing insert");

        let result = if params.is_empty() {
            conn.create_statement().and_then(|mut stmt| {
                let result = self.insert_plain(stmt.as_mut(), sql, handler);
                release(result, stmt.close(), "statement")
            })
        } else {
            conn.prepare_statement(sql, GeneratedKeys::Requested)
                .and_then(|mut stmt| {
                    let result = self.insert_prepared(stmt.as_mut(), handler, params);
                    release(result, stmt.close(), "statement")
                })
        };
        result.map_err(|e| e.with_statement(sql, &*params))
    }

    fn insert_plain<H: ResultSetHandler>(
        &self,
        stmt: &mut dyn Statement,
        sql: &str,
        handler: &H,
    ) -> DbResult<H::Output> {
        self.configure(stmt)?;
        stmt.execute_update(sql, GeneratedKeys::Requested)?;
        handle_result(stmt.generated_keys()?, handler)
    }

    fn insert_prepared<H: ResultSetHandler>(
        &self,
        stmt: &mut dyn PreparedStatement,
        handler: &H,
        params: &[Value],
    ) -> DbResult<H::Output> {
        self.update_prepared(stmt, params)?;
        handle_result(stmt.generated_keys()?, handler)
    }

    /// Run an INSERT once per row of `rows` in a single batch and convert the
    /// generated keys of all rows with `handler`.
    pub fn insert_batch<H: ResultSetHandler, R: AsRef<[Value]>>(
        &self,
        sql: &str,
        handler: &H,
        rows: &[R],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        self.with_connection(|conn| self.insert_batch_with(conn, sql, handler, rows))
    }

    pub fn insert_batch_with<H: ResultSetHandler, R: AsRef<[Value]>>(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        handler: &H,
        rows: &[R],
    ) -> DbResult<H::Output> {
        require_sql(sql)?;
        debug!(sql = %sql, rows = rows.len(), "Executing insert batch");

        conn.prepare_statement(sql, GeneratedKeys::Requested)
            .and_then(|mut stmt| {
                let result = self.insert_batch_prepared(stmt.as_mut(), handler, rows);
                release(result, stmt.close(), "statement")
            })
            .map_err(|e| e.with_statement(sql, describe_rows(rows).as_slice()))
    }

    fn insert_batch_prepared<H: ResultSetHandler, R: AsRef<[Value]>>(
        &self,
        stmt: &mut dyn PreparedStatement,
        handler: &H,
        rows: &[R],
    ) -> DbResult<H::Output> {
        self.fill_batch(stmt, rows)?;
        stmt.execute_batch()?;
        handle_result(stmt.generated_keys()?, handler)
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    /// Apply the configured statement options. Unset options are skipped.
    fn configure<S: StatementBase + ?Sized>(&self, stmt: &mut S) -> DbResult<()> {
        let config = &self.statement_config;
        if let Some(direction) = config.fetch_direction {
            stmt.set_fetch_direction(direction)?;
        }
        if let Some(rows) = config.fetch_size {
            stmt.set_fetch_size(rows)?;
        }
        if let Some(bytes) = config.max_field_size {
            stmt.set_max_field_size(bytes)?;
        }
        if let Some(rows) = config.max_rows {
            stmt.set_max_rows(rows)?;
        }
        if let Some(timeout) = config.query_timeout {
            stmt.set_query_timeout(timeout)?;
        }
        Ok(())
    }

    /// Run `op` on a connection from the source, closing it afterwards.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut dyn Connection) -> DbResult<T>,
    ) -> DbResult<T> {
        let source = self.source.as_ref().ok_or_else(|| {
            DbError::null_argument(
                "connection",
                "QueryRunner requires a connection source to be invoked without a connection",
            )
        })?;
        let mut conn = source.acquire()?;
        let result = op(conn.as_mut());
        release(result, conn.close(), "connection")
    }
}

/// Reject missing SQL text before any driver call.
///
/// Only the empty string is missing. Blank text is still SQL; the driver
/// decides what to make of it.
fn require_sql(sql: &str) -> DbResult<()> {
    if sql.is_empty() {
        return Err(DbError::null_argument("sql", "Null SQL statement"));
    }
    Ok(())
}

/// Hand a result set to `handler`, closing it afterwards.
fn handle_result<H: ResultSetHandler>(
    rs: Box<dyn ResultSet + '_>,
    handler: &H,
) -> DbResult<H::Output> {
    let mut cursor = ResultCursor::new(rs);
    let result = handler.handle(&mut cursor);
    release(result, cursor.close(), "result set")
}

/// Combine the outcome of an operation with the outcome of releasing one of
/// its resources. The operation's own failure takes precedence.
fn release<T>(result: DbResult<T>, closed: DbResult<()>, resource: &'static str) -> DbResult<T> {
    match closed {
        Ok(()) => result,
        Err(close_err) => {
            warn!(resource, error = %close_err, "Failed to release resource");
            match result {
                Ok(_) => Err(close_err),
                Err(e) => Err(e),
            }
        }
    }
}

/// Render batch rows for error context.
fn describe_rows<R: AsRef<[Value]>>(rows: &[R]) -> Vec<String> {
    rows.iter()
        .map(|row| {
            let values: Vec<String> = row.as_ref().iter().map(|v| v.to_string()).collect();
            format!("[{}]", values.join(", "))
        })
        .collect()
}
