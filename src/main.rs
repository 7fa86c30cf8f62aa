//! Query Runner - command line entry point.
//!
//! Runs one statement against a SQLite database and prints the outcome as
//! JSON on stdout.

use clap::Parser;
use query_runner::config::{Command, Config};
use query_runner::db::{AsyncQueryRunner, QueryRunner, SqliteSource};
use query_runner::handlers::{ArrayListHandler, MapListHandler};
use query_runner::models::Value;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only results.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Parse a command line parameter. JSON literals keep their type; anything
/// else is taken as text.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw))
}

fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|p| parse_param(p)).collect()
}

fn parse_rows(raw: &str) -> Result<Vec<Vec<Value>>, Box<dyn std::error::Error>> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid --rows JSON: {}", e).into())
}

fn keys_json(keys: Vec<Vec<Value>>) -> serde_json::Value {
    keys.iter()
        .map(|row| row.iter().map(Value::to_json).collect::<Vec<_>>())
        .collect()
}

async fn run(config: Config) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let options = config.runner_options();
    options.validate()?;

    let source = SqliteSource::open(&config.database).await?;
    let runner = AsyncQueryRunner::from_options(QueryRunner::with_source(Arc::new(source)), &options)?;

    let output = match config.command {
        Command::Query { sql, params } => {
            let rows = runner
                .query(sql, MapListHandler::new(), parse_params(&params))
                .await?;
            info!(rows = rows.len(), "Query complete");
            serde_json::to_value(rows)?
        }
        Command::Update { sql, params } => {
            let count = runner.update(sql, parse_params(&params)).await?;
            info!(rows_affected = count, "Update complete");
            json!({ "rows_affected": count })
        }
        Command::Insert { sql, params } => {
            let keys = runner
                .insert(sql, ArrayListHandler::new(), parse_params(&params))
                .await?;
            json!({ "generated_keys": keys_json(keys) })
        }
        Command::Batch { sql, rows } => {
            let counts = runner.batch(sql, parse_rows(&rows)?).await?;
            info!(entries = counts.len(), "Batch complete");
            json!({ "rows_affected": counts })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        database = %config.database,
        "Starting query-runner v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}
