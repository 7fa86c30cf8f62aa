//! Asynchronous facade over [`QueryRunner`].
//!
//! Each operation runs the synchronous one on tokio's blocking thread pool.
//! A semaphore bounds how many of them run at once; the rest wait for a
//! permit without occupying a blocking thread.
//!
//! Operations are started when called, not when their future is first
//! polled. Dropping a [`QueryFuture`] does not stop the operation.

use crate::config::RunnerOptions;
use crate::db::driver::Connection;
use crate::db::executor::QueryRunner;
use crate::error::{DbError, DbResult};
use crate::handlers::ResultSetHandler;
use crate::models::{Param, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// A connection shared with operations running on the blocking pool.
pub type SharedConnection<C> = Arc<Mutex<C>>;

/// Outcome of a stored procedure call run asynchronously: the call's result
/// and the parameters, with OUT markers filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult<T> {
    pub result: T,
    pub params: Vec<Param>,
}

/// Result of an operation submitted to an [`AsyncQueryRunner`].
#[must_use = "the operation runs regardless, but its result is lost if the future is dropped"]
pub struct QueryFuture<T> {
    inner: JoinHandle<DbResult<T>>,
}

impl<T> QueryFuture<T> {
    /// Request cancellation. Best effort: an operation waiting for a worker
    /// is abandoned, a driver call already running is not interrupted.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for QueryFuture<T> {
    type Output = DbResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(DbError::internal("Operation was cancelled")),
            Err(e) => Err(DbError::internal(format!("Operation failed: {}", e))),
        })
    }
}

/// Runs [`QueryRunner`] operations without blocking the async runtime.
#[derive(Debug, Clone)]
pub struct AsyncQueryRunner {
    runner: Arc<QueryRunner>,
    permits: Arc<Semaphore>,
    handle: Handle,
}

impl AsyncQueryRunner {
    /// Wrap `runner`, running operations on `handle` with at most `workers`
    /// of them in flight.
    pub fn new(runner: QueryRunner, handle: Handle, workers: usize) -> Self {
        Self {
            runner: Arc::new(runner),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            handle,
        }
    }

    /// Wrap `runner` on the current runtime, configured from `options`.
    ///
    /// Fails outside a tokio runtime or when the options are invalid.
    pub fn from_options(runner: QueryRunner, options: &RunnerOptions) -> DbResult<Self> {
        options.validate().map_err(DbError::internal)?;
        let handle = Handle::try_current()
            .map_err(|e| DbError::internal(format!("No tokio runtime available: {}", e)))?;
        Ok(Self::new(
            runner.with_options(options),
            handle,
            options.async_workers_or_default(),
        ))
    }

    /// The wrapped synchronous runner.
    pub fn runner(&self) -> &QueryRunner {
        &self.runner
    }

    /// Permits currently free.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    fn spawn<T, F>(&self, op: F) -> QueryFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&QueryRunner) -> DbResult<T> + Send + 'static,
    {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        let inner = self.handle.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return Err(DbError::internal("Worker pool is closed"));
            };
            // Held until the blocking call returns, even if the future is aborted.
            match tokio::task::spawn_blocking(move || {
                let _permit = permit;
                op(&runner)
            })
            .await
            {
                Ok(result) => result,
                Err(e) => Err(DbError::internal(format!("Blocking task failed: {}", e))),
            }
        });
        QueryFuture { inner }
    }

    fn spawn_on<C, T, F>(&self, conn: SharedConnection<C>, op: F) -> QueryFuture<T>
    where
        C: Connection + Send + 'static,
        T: Send + 'static,
        F: FnOnce(&QueryRunner, &mut dyn Connection) -> DbResult<T> + Send + 'static,
    {
        self.spawn(move |runner| {
            let mut guard = conn.blocking_lock();
            op(runner, &mut *guard)
        })
    }

    pub fn query<H>(
        &self,
        sql: impl Into<String>,
        handler: H,
        params: Vec<Value>,
    ) -> QueryFuture<H::Output>
    where
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        debug!(sql = %sql, "Submitting query");
        self.spawn(move |runner| runner.query(&sql, &handler, &params))
    }

    pub fn query_with<C, H>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        handler: H,
        params: Vec<Value>,
    ) -> QueryFuture<H::Output>
    where
        C: Connection + Send + 'static,
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| {
            runner.query_with(conn, &sql, &handler, &params)
        })
    }

    pub fn update(&self, sql: impl Into<String>, params: Vec<Value>) -> QueryFuture<u64> {
        let sql = sql.into();
        debug!(sql = %sql, "Submitting update");
        self.spawn(move |runner| runner.update(&sql, &params))
    }

    pub fn update_with<C>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> QueryFuture<u64>
    where
        C: Connection + Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| runner.update_with(conn, &sql, &params))
    }

    pub fn batch(&self, sql: impl Into<String>, rows: Vec<Vec<Value>>) -> QueryFuture<Vec<u64>> {
        let sql = sql.into();
        debug!(sql = %sql, rows = rows.len(), "Submitting batch");
        self.spawn(move |runner| runner.batch(&sql, &rows))
    }

    pub fn batch_with<C>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        rows: Vec<Vec<Value>>,
    ) -> QueryFuture<Vec<u64>>
    where
        C: Connection + Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| runner.batch_with(conn, &sql, &rows))
    }

    /// Run a call without result sets. The returned parameters carry the
    /// retrieved OUT values.
    pub fn execute(
        &self,
        sql: impl Into<String>,
        mut params: Vec<Param>,
    ) -> QueryFuture<CallResult<u64>> {
        let sql = sql.into();
        debug!(sql = %sql, "Submitting call");
        self.spawn(move |runner| {
            let result = runner.execute(&sql, &mut params)?;
            Ok(CallResult { result, params })
        })
    }

    pub fn execute_with<C>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        mut params: Vec<Param>,
    ) -> QueryFuture<CallResult<u64>>
    where
        C: Connection + Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| {
            let result = runner.execute_with(conn, &sql, &mut params)?;
            Ok(CallResult { result, params })
        })
    }

    /// Run a call returning result sets, converting each with `handler`.
    pub fn execute_results<H>(
        &self,
        sql: impl Into<String>,
        handler: H,
        mut params: Vec<Param>,
    ) -> QueryFuture<CallResult<Vec<H::Output>>>
    where
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        debug!(sql = %sql, "Submitting call with results");
        self.spawn(move |runner| {
            let result = runner.execute_results(&sql, &handler, &mut params)?;
            Ok(CallResult { result, params })
        })
    }

    pub fn execute_results_with<C, H>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        handler: H,
        mut params: Vec<Param>,
    ) -> QueryFuture<CallResult<Vec<H::Output>>>
    where
        C: Connection + Send + 'static,
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| {
            let result = runner.execute_results_with(conn, &sql, &handler, &mut params)?;
            Ok(CallResult { result, params })
        })
    }

    pub fn insert<H>(
        &self,
        sql: impl Into<String>,
        handler: H,
        params: Vec<Value>,
    ) -> QueryFuture<H::Output>
    where
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        debug!(sql = %sql, "Submitting insert");
        self.spawn(move |runner| runner.insert(&sql, &handler, &params))
    }

    pub fn insert_with<C, H>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        handler: H,
        params: Vec<Value>,
    ) -> QueryFuture<H::Output>
    where
        C: Connection + Send + 'static,
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| {
            runner.insert_with(conn, &sql, &handler, &params)
        })
    }

    pub fn insert_batch<H>(
        &self,
        sql: impl Into<String>,
        handler: H,
        rows: Vec<Vec<Value>>,
    ) -> QueryFuture<H::Output>
    where
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        debug!(sql = %sql, rows = rows.len(), "Submitting insert batch");
        self.spawn(move |runner| runner.insert_batch(&sql, &handler, &rows))
    }

    pub fn insert_batch_with<C, H>(
        &self,
        conn: SharedConnection<C>,
        sql: impl Into<String>,
        handler: H,
        rows: Vec<Vec<Value>>,
    ) -> QueryFuture<H::Output>
    where
        C: Connection + Send + 'static,
        H: ResultSetHandler + Send + 'static,
        H::Output: Send + 'static,
    {
        let sql = sql.into();
        self.spawn_on(conn, move |runner, conn| {
            runner.insert_batch_with(conn, &sql, &handler, &rows)
        })
    }
}
