//! Error types for the query runner.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver failures, binding problems and handler failures are distinct variants so
//! callers can tell them apart; anything raised while a statement was being run is
//! wrapped once in [`DbError::Statement`] together with the SQL text and parameters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// A required argument was missing. Raised before any driver call.
    #[error("Null {argument}: {message}")]
    NullArgument {
        argument: &'static str,
        message: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// Wrong parameter count or type for the statement's placeholders.
    #[error("Binding error: {message}")]
    Binding {
        message: String,
        /// 1-based placeholder index, when the failure is tied to one.
        index: Option<usize>,
    },

    #[error("Execution error: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    /// Raised by a result set handler.
    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    /// A failure while preparing, binding, executing or handling a statement,
    /// carrying the statement text and parameters for diagnostics.
    #[error("{source} Query: {sql} Parameters: [{}]", .params.join(", "))]
    Statement {
        #[source]
        source: Box<DbError>,
        sql: String,
        params: Vec<String>,
    },
}

impl DbError {
    /// Create a null argument error.
    pub fn null_argument(argument: &'static str, message: impl Into<String>) -> Self {
        Self::NullArgument {
            argument,
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a binding error that is not tied to a single placeholder.
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding {
            message: message.into(),
            index: None,
        }
    }

    /// Create a binding error for the placeholder at `index` (1-based).
    pub fn binding_at(index: usize, message: impl Into<String>) -> Self {
        Self::Binding {
            message: message.into(),
            index: Some(index),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap `cause` with the statement text and parameters it was raised for.
    ///
    /// An error that already carries statement context is returned unchanged.
    pub fn with_statement<P: std::fmt::Display>(self, sql: &str, params: &[P]) -> Self {
        match self {
            Self::Statement { .. } => self,
            cause => Self::Statement {
                source: Box::new(cause),
                sql: sql.to_string(),
                params: params.iter().map(|p| p.to_string()).collect(),
            },
        }
    }

    /// The underlying error, with any statement context removed.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::Statement { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// SQL text of the statement this error was raised for, if known.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Statement { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self.root_cause() {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Connection { .. } | Self::Timeout { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check that the database file is reachable and not locked",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::binding(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::execution(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::execution(
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => {
                DbError::execution(format!("Decode error: {}", source), None)
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
