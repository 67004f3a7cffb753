//! Query execution engine.
//!
//! Statements and procedure calls are validated and bound once, then run on
//! the caller's connection under the statement retry policy. Each attempt is
//! bounded by the connection's request timeout.

use crate::db::connection::Connection;
use crate::db::driver::{BoundStatement, StatementKind};
use crate::db::params::{
    bind_procedure, bind_statement, validate_parameter_names, validate_procedure_name,
};
use crate::db::retry::{RetryPolicy, with_retry_if};
use crate::error::{DbError, DbResult};
use crate::models::{IntoParameters, QueryParameters, QueryResult};
use tokio::time::Instant;
use tracing::debug;

/// Runs statements on a [`Connection`].
#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute a statement with `@name` parameters.
    pub async fn execute(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl IntoParameters,
    ) -> DbResult<QueryResult> {
        let start = Instant::now();
        if sql.trim().is_empty() {
            return Err(DbError::validation("Invalid SQL query provided"));
        }
        let params = params.into_parameters()?;
        validate_parameter_names(&params)?;
        let statement = bind_statement(sql, &params, conn.dialect(), StatementKind::Query)?;
        log_unused(&params, &statement);
        self.run(conn, statement, start).await
    }

    /// Call a stored procedure with its parameters in insertion order.
    pub async fn execute_procedure(
        &self,
        conn: &Connection,
        name: &str,
        params: impl IntoParameters,
    ) -> DbResult<QueryResult> {
        let start = Instant::now();
        validate_procedure_name(name)?;
        let params = params.into_parameters()?;
        validate_parameter_names(&params)?;
        let statement = bind_procedure(name, &params, conn.dialect())?;
        self.run(conn, statement, start).await
    }

    async fn run(
        &self,
        conn: &Connection,
        statement: BoundStatement,
        start: Instant,
    ) -> DbResult<QueryResult> {
        debug!(
            connection_id = conn.id(),
            sql = %statement.sql,
            params = statement.params.len(),
            kind = ?statement.kind,
            "Executing statement"
        );

        let output =
            with_retry_if(&self.retry, || conn.execute(&statement), DbError::is_retryable).await?;

        let row_count = if output.rows.is_empty() {
            output.rows_affected
        } else {
            output.rows.len() as u64
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            connection_id = conn.id(),
            row_count = row_count,
            duration_ms = execution_time_ms,
            "Statement completed"
        );

        Ok(QueryResult {
            row_count,
            rows: output.rows,
            execution_time_ms,
        })
    }
}

fn log_unused(params: &QueryParameters, statement: &BoundStatement) {
    for (name, _) in params.iter() {
        if !statement.params.iter().any(|p| p.name == name) {
            debug!(parameter = name, "Parameter not referenced by statement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionDescriptor;
    use crate::db::connection::ConnectionManager;
    use crate::db::memory::MemoryDriver;
    use crate::models::{Row, WireType};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::resolve([
            ("DB_SERVER", "localhost"),
            ("DB_USER", "auth"),
            ("DB_PASSWORD", "pw"),
            ("DB_DATABASE", "authdb"),
        ])
        .unwrap()
    }

    fn manager(driver: &MemoryDriver) -> ConnectionManager {
        ConnectionManager::new(Arc::new(driver.clone()), descriptor())
            .with_retry_policy(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_empty_sql_is_rejected() {
        let driver = MemoryDriver::new();
        let conn = manager(&driver).acquire().await.unwrap();
        let err = QueryExecutor::new().execute(&conn, "   ", ()).await.unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_row_count_prefers_rows_then_affected() {
        let driver = MemoryDriver::new();
        driver.respond_to(
            "FROM users",
            vec![
                Row::from_pairs([("id", json!(1))]),
                Row::from_pairs([("id", json!(2))]),
            ],
        );
        driver.affect_rows("UPDATE users", 5);
        let conn = manager(&driver).acquire().await.unwrap();
        let executor = QueryExecutor::new();

        let result = executor
            .execute(&conn, "SELECT id FROM users", ())
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);

        let result = executor
            .execute(&conn, "UPDATE users SET active = @active", [("active", false)])
            .await
            .unwrap();
        assert_eq!(result.row_count, 5);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_procedure_call_binds_in_order() {
        let driver = MemoryDriver::new();
        let conn = manager(&driver).acquire().await.unwrap();
        let params = QueryParameters::new()
            .with("user_id", 7)
            .with("token", "abc");
        QueryExecutor::new()
            .execute_procedure(&conn, "auth.revoke_token", params)
            .await
            .unwrap();

        let executed = driver.executed();
        assert_eq!(executed[0].sql, "CALL auth.revoke_token($1, $2)");
        assert_eq!(executed[0].kind, StatementKind::Procedure);
        assert_eq!(executed[0].params[0].wire_type(), WireType::Int);
        assert_eq!(executed[0].params[1].wire_type(), WireType::VarChar);
    }

    #[tokio::test]
    async fn test_invalid_procedure_name_never_reaches_driver() {
        let driver = MemoryDriver::new();
        let conn = manager(&driver).acquire().await.unwrap();
        let err = QueryExecutor::new()
            .execute_procedure(&conn, "x; DROP TABLE users", ())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_binding_failure_is_not_retried() {
        let driver = MemoryDriver::new();
        let conn = manager(&driver).acquire().await.unwrap();
        let executor = QueryExecutor::with_retry_policy(RetryPolicy::new(3, Duration::ZERO));
        let err = executor
            .execute(&conn, "SELECT * FROM users WHERE id = @id", ())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_failures_are_retried() {
        let driver = MemoryDriver::new();
        driver.fail_next_executions(2, "deadlock detected");
        let conn = manager(&driver).acquire().await.unwrap();
        let executor =
            QueryExecutor::with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)));
        let result = executor.execute(&conn, "SELECT 1", ()).await.unwrap();
        assert_eq!(driver.executed().len(), 3);
        assert_eq!(result.execution_time_ms, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_failure_is_not_retried() {
        let driver = MemoryDriver::new();
        driver.fail_next_executions_with(
            3,
            DbError::from(sqlx::Error::Encode("integer out of range".into())),
        );
        let conn = manager(&driver).acquire().await.unwrap();
        let executor =
            QueryExecutor::with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)));
        let err = executor.execute(&conn, "SELECT 1", ()).await.unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));
        assert_eq!(driver.executed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_surfaces_after_retries() {
        let driver = MemoryDriver::new();
        driver.delay_executions(Duration::from_secs(60));
        let conn = manager(&driver).acquire().await.unwrap();
        let executor = QueryExecutor::with_retry_policy(RetryPolicy::new(2, Duration::ZERO));
        let err = executor.execute(&conn, "SELECT 1", ()).await.unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert_eq!(driver.executed().len(), 2);
    }
}
