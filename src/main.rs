//! authdb - command-line entry point over the database-access core.

use authdb_core::config::{Command, Config, ConnectionDescriptor};
use authdb_core::db::{ConnectionManager, Diagnostics, QueryExecutor, SqlxDriver};
use authdb_core::lifecycle::shutdown_on_signal;
use authdb_core::models::{QueryParameters, QueryResult};
use authdb_core::{DbError, DbResult};
use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries command output; logs go to stderr.
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

fn print_json<T: Serialize>(value: &T) -> DbResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

fn parse_params(raw: Option<&str>) -> DbResult<QueryParameters> {
    match raw {
        None => Ok(QueryParameters::new()),
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| DbError::validation(format!("--params is not valid JSON: {e}")))?;
            QueryParameters::from_json(value)
        }
    }
}

async fn run_statement(
    manager: &ConnectionManager,
    executor: &QueryExecutor,
    command: &Command,
) -> DbResult<QueryResult> {
    let (target, params, is_procedure) = match command {
        Command::Query { sql, params } => (sql, params, false),
        Command::Procedure { name, params } => (name, params, true),
        _ => return Err(DbError::internal("not a statement command")),
    };
    // Bad --params must not cost a connection.
    let params = parse_params(params.as_deref())?;

    let conn = manager.acquire().await?;
    let result = if is_procedure {
        executor.execute_procedure(&conn, target, params).await
    } else {
        executor.execute(&conn, target, params).await
    };
    if let Err(e) = conn.close().await {
        error!(error = %e, "Failed to close connection");
    }
    result
}

async fn dispatch(
    config: &Config,
    diagnostics: &Diagnostics,
    executor: &QueryExecutor,
) -> DbResult<ExitCode> {
    let manager = diagnostics.manager();
    match &config.command {
        Command::Health => {
            let report = diagnostics.health_check().await;
            print_json(&report)?;
            Ok(if report.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Stats => {
            print_json(&diagnostics.connection_stats().await)?;
            Ok(ExitCode::SUCCESS)
        }
        command @ (Command::Query { .. } | Command::Procedure { .. }) => {
            let result = run_statement(manager, executor, command).await?;
            print_json(&result)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run => {
            let conn = manager.acquire().await?;
            info!(connection_id = conn.id(), "Holding connection until shutdown");
            std::future::pending::<()>().await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::parse();
    init_tracing(&config);

    let descriptor = match ConnectionDescriptor::from_env() {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(error = %e, "Invalid database configuration");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        server = %descriptor.masked_target(),
        "Starting authdb v{}",
        env!("CARGO_PKG_VERSION")
    );

    let driver = Arc::new(SqlxDriver::new(descriptor.db_type));
    let manager =
        ConnectionManager::new(driver, descriptor).with_retry_policy(config.connect_retry_policy());
    let executor = QueryExecutor::with_retry_policy(config.query_retry_policy());
    let diagnostics = Diagnostics::new(manager, executor.clone());

    let outcome = tokio::select! {
        result = dispatch(&config, &diagnostics, &executor) => result,
        result = shutdown_on_signal(&diagnostics, config.shutdown_grace()) => {
            match result {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(e) => Err(DbError::internal(format!("Signal handling failed: {e}"))),
            }
        }
    };
    diagnostics.shutdown().await;

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, class = ?e.class(), "Command failed");
            eprintln!("Error: {e}");
            if let Some(suggestion) = e.suggestion().filter(|s| !s.is_empty()) {
                eprintln!("Hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}
