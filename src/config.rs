//! Configuration handling for the query runner.
//!
//! Statement tuning options ([`StatementConfig`]) and runner options
//! ([`RunnerOptions`]) are plain serde structs so they can be embedded in an
//! application's own configuration. The command line tool's options
//! ([`Config`]) are parsed from CLI arguments and environment variables.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ASYNC_WORKERS: usize = 8;
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 3600;

/// Direction in which rows are expected to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FetchDirection {
    Forward,
    Reverse,
    Unknown,
}

impl FetchDirection {
    /// JDBC `ResultSet.FETCH_*` constant.
    pub fn code(self) -> i32 {
        match self {
            Self::Forward => 1000,
            Self::Reverse => 1001,
            Self::Unknown => 1002,
        }
    }
}

impl std::fmt::Display for FetchDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tuning options applied to every statement a runner prepares.
///
/// Each option is independent; `None` leaves the driver default in place, so
/// "unset" and zero stay distinguishable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementConfig {
    pub fetch_direction: Option<FetchDirection>,
    /// Rows fetched per round trip.
    pub fetch_size: Option<u32>,
    /// Maximum bytes returned for character and binary columns.
    pub max_field_size: Option<u32>,
    /// Maximum rows a result set may contain.
    pub max_rows: Option<u64>,
    #[serde(default, with = "duration_secs")]
    pub query_timeout: Option<Duration>,
}

impl StatementConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_direction(mut self, direction: FetchDirection) -> Self {
        self.fetch_direction = Some(direction);
        self
    }

    pub fn with_fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = Some(rows);
        self
    }

    pub fn with_max_field_size(mut self, bytes: u32) -> Self {
        self.max_field_size = Some(bytes);
        self
    }

    pub fn with_max_rows(mut self, rows: u64) -> Self {
        self.max_rows = Some(rows);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Validate the options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(timeout) = self.query_timeout {
            if timeout.as_secs() > MAX_QUERY_TIMEOUT_SECS {
                return Err(format!(
                    "query_timeout ({}s) cannot exceed {}s",
                    timeout.as_secs(),
                    MAX_QUERY_TIMEOUT_SECS
                ));
            }
        }
        Ok(())
    }
}

/// Serialize an optional timeout as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

/// Options of a [`QueryRunner`](crate::db::QueryRunner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerOptions {
    /// Skip parameter metadata entirely, for drivers known not to support it.
    #[serde(default)]
    pub pmd_known_broken: bool,
    #[serde(default)]
    pub statement: StatementConfig,
    /// Upper bound on concurrently running async operations (default: 8).
    pub async_workers: Option<usize>,
}

impl RunnerOptions {
    /// Get async_workers with default value.
    pub fn async_workers_or_default(&self) -> usize {
        self.async_workers.unwrap_or(DEFAULT_ASYNC_WORKERS)
    }

    /// Validate runner options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.async_workers == Some(0) {
            return Err("async_workers must be greater than 0".to_string());
        }
        self.statement.validate()
    }
}

/// Command line options of the `query-runner` tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "query-runner", version, about = "Run SQL against a SQLite database")]
pub struct Config {
    /// SQLite connection string, e.g. `sqlite:data.db?mode=rwc`
    #[arg(long, env = "QUERY_RUNNER_DATABASE")]
    pub database: String,

    /// Log level filter when RUST_LOG is not set
    #[arg(long, env = "QUERY_RUNNER_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "QUERY_RUNNER_JSON_LOGS")]
    pub json_logs: bool,

    #[arg(long)]
    pub fetch_direction: Option<FetchDirection>,

    #[arg(long)]
    pub fetch_size: Option<u32>,

    #[arg(long)]
    pub max_field_size: Option<u32>,

    #[arg(long)]
    pub max_rows: Option<u64>,

    /// Query timeout in seconds
    #[arg(long, env = "QUERY_RUNNER_QUERY_TIMEOUT")]
    pub query_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Operation to run.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a query and print its rows as JSON objects
    Query {
        sql: String,
        /// Positional parameter as a JSON value; repeat for each placeholder
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Run an INSERT, UPDATE or DELETE and print the affected row count
    Update {
        sql: String,
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Run an INSERT and print the generated keys
    Insert {
        sql: String,
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Run a statement once per row and print the update counts
    Batch {
        sql: String,
        /// JSON array of rows, each an array of parameter values
        #[arg(long)]
        rows: String,
    },
}

impl Config {
    /// Statement options assembled from the command line flags.
    pub fn statement_config(&self) -> StatementConfig {
        StatementConfig {
            fetch_direction: self.fetch_direction,
            fetch_size: self.fetch_size,
            max_field_size: self.max_field_size,
            max_rows: self.max_rows,
            query_timeout: self.query_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Runner options for the tool. SQLite cannot describe placeholders, so
    /// metadata lookups are skipped from the start.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            pmd_known_broken: true,
            statement: self.statement_config(),
            async_workers: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_config_default_is_empty() {
        let config = StatementConfig::default();
        assert!(config.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_statement_config_builder() {
        let config = StatementConfig::new()
            .with_fetch_direction(FetchDirection::Forward)
            .with_fetch_size(2)
            .with_max_field_size(3)
            .with_max_rows(4)
            .with_query_timeout(Duration::from_secs(5));
        assert_eq!(config.fetch_direction, Some(FetchDirection::Forward));
        assert_eq!(config.fetch_size, Some(2));
        assert_eq!(config.max_field_size, Some(3));
        assert_eq!(config.max_rows, Some(4));
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert!(!config.is_empty());
    }

    #[test]
    fn test_zero_is_not_unset() {
        let config = StatementConfig::new().with_fetch_size(0);
        assert_eq!(config.fetch_size, Some(0));
        assert!(!config.is_empty());
    }

    #[test]
    fn test_statement_config_timeout_bound() {
        let config = StatementConfig::new().with_query_timeout(Duration::from_secs(7200));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_statement_config_serde() {
        let config: StatementConfig =
            serde_json::from_str(r#"{"fetch_size": 100, "query_timeout": 30}"#).unwrap();
        assert_eq!(config.fetch_size, Some(100));
        assert_eq!(config.query_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_rows, None);

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["query_timeout"], 30);
    }

    #[test]
    fn test_runner_options_validate() {
        let options = RunnerOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.async_workers_or_default(), DEFAULT_ASYNC_WORKERS);

        let options = RunnerOptions {
            async_workers: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_fetch_direction_codes() {
        assert_eq!(FetchDirection::Forward.code(), 1000);
        assert_eq!(FetchDirection::Reverse.to_string(), "reverse");
    }

    #[test]
    fn test_cli_parse() {
        let config = Config::try_parse_from([
            "query-runner",
            "--database",
            "sqlite::memory:",
            "--max-rows",
            "10",
            "--query-timeout-secs",
            "5",
            "query",
            "select * from t where id = ?",
            "-p",
            "1",
        ])
        .unwrap();
        assert_eq!(config.database, "sqlite::memory:");
        let stmt = config.statement_config();
        assert_eq!(stmt.max_rows, Some(10));
        assert_eq!(stmt.query_timeout, Some(Duration::from_secs(5)));
        assert!(config.runner_options().pmd_known_broken);
        match config.command {
            Command::Query { sql, params } => {
                assert_eq!(sql, "select * from t where id = ?");
                assert_eq!(params, vec!["1".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
