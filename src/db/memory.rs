//! In-memory driver.
//!
//! A scripted [`Driver`] for exercising the core, and services built on it,
//! without a database. Responses are matched by SQL fragment; failures,
//! delays and a connect gate can be injected. Every executed statement is
//! recorded in its bound form.

use crate::config::ConnectionDescriptor;
use crate::db::driver::{BoundStatement, Dialect, Driver, Session, SessionOutput};
use crate::error::{DbError, DbResult};
use crate::models::Row;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Default)]
struct Response {
    fragment: String,
    rows: Vec<Row>,
    rows_affected: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    connect_attempts: u32,
    sessions_opened: u64,
    sessions_closed: u64,
    unreachable: bool,
    connect_failures: u32,
    connect_gate: Option<Arc<Semaphore>>,
    responses: Vec<Response>,
    execution_failures: u32,
    execution_failure: Option<DbError>,
    execution_delay: Option<Duration>,
    failing_closes: HashSet<u64>,
    executed: Vec<BoundStatement>,
    transaction_log: Vec<String>,
}

/// Scripted driver. Clones share state, so a test can keep one handle while
/// the manager owns another.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    dialect: Dialect,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// A reachable PostgreSQL-dialect server.
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Postgres)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not poison the script for others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse every connection attempt.
    pub fn unreachable(&self) {
        self.state().unreachable = true;
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().connect_failures = n;
    }

    /// Park connection attempts until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.state().connect_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_connects(&self) {
        if let Some(gate) = self.state().connect_gate.take() {
            gate.close();
        }
    }

    /// Return `rows` for statements containing `fragment`.
    pub fn respond_to(&self, fragment: impl Into<String>, rows: Vec<Row>) {
        self.state().responses.push(Response {
            fragment: fragment.into(),
            rows,
            rows_affected: 0,
        });
    }

    /// Report `count` affected rows for statements containing `fragment`.
    pub fn affect_rows(&self, fragment: impl Into<String>, count: u64) {
        self.state().responses.push(Response {
            fragment: fragment.into(),
            rows: Vec::new(),
            rows_affected: count,
        });
    }

    /// Fail the next `n` statements with a server-side error.
    pub fn fail_next_executions(&self, n: u32, message: impl Into<String>) {
        self.fail_next_executions_with(n, DbError::execution(message, None, ""));
    }

    /// Fail the next `n` statements with `error`.
    pub fn fail_next_executions_with(&self, n: u32, error: DbError) {
        let mut state = self.state();
        state.execution_failures = n;
        state.execution_failure = Some(error);
    }

    /// Delay every statement by `delay`.
    pub fn delay_executions(&self, delay: Duration) {
        self.state().execution_delay = Some(delay);
    }

    /// Make closing the `n`th opened session (1-based) fail.
    pub fn fail_close_for_session(&self, n: u64) {
        self.state().failing_closes.insert(n);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state().sessions_opened
    }

    pub fn sessions_closed(&self) -> u64 {
        self.state().sessions_closed
    }

    /// Every statement that reached a session, in order.
    pub fn executed(&self) -> Vec<BoundStatement> {
        self.state().executed.clone()
    }

    /// `BEGIN` / `COMMIT` / `ROLLBACK` in the order they were applied.
    pub fn transaction_log(&self) -> Vec<String> {
        self.state().transaction_log.clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, _descriptor: &ConnectionDescriptor) -> DbResult<Box<dyn Session>> {
        let gate = {
            let mut state = self.state();
            state.connect_attempts += 1;
            state.connect_gate.clone()
        };
        if let Some(gate) = gate {
            // Closed on release.
            let _ = gate.acquire().await;
        }

        let mut state = self.state();
        if state.unreachable {
            return Err(DbError::connection(
                "connection refused",
                "Check that the server is running and accessible",
            ));
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DbError::connection(
                "connection reset by peer",
                "Check network connectivity and database server status",
            ));
        }
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            number: state.sessions_opened,
            in_transaction: false,
            driver: self.clone(),
        }))
    }
}

struct MemorySession {
    number: u64,
    in_transaction: bool,
    driver: MemoryDriver,
}

impl MemorySession {
    fn log(&self, entry: &str) {
        self.driver.state().transaction_log.push(entry.to_string());
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&mut self, statement: &BoundStatement) -> DbResult<SessionOutput> {
        let delay = {
            let mut state = self.driver.state();
            state.executed.push(statement.clone());
            state.execution_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.driver.state();
        if state.execution_failures > 0 {
            if let Some(error) = state.execution_failure.clone() {
                state.execution_failures -= 1;
                return Err(error);
            }
        }
        Ok(state
            .responses
            .iter()
            .find(|r| statement.sql.contains(&r.fragment))
            .map(|r| SessionOutput {
                rows: r.rows.clone(),
                rows_affected: r.rows_affected,
            })
            .unwrap_or_default())
    }

    async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::transaction("Transaction already in progress", ""));
        }
        self.in_transaction = true;
        self.log("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction("No transaction in progress", ""));
        }
        self.in_transaction = false;
        self.log("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction("No transaction in progress", ""));
        }
        self.in_transaction = false;
        self.log("ROLLBACK");
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        let mut state = self.driver.state();
        state.sessions_closed += 1;
        if state.failing_closes.contains(&self.number) {
            return Err(DbError::connection(
                format!("session {} failed to close", self.number),
                "",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::StatementKind;
    use serde_json::json;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::resolve([
            ("DB_SERVER", "localhost"),
            ("DB_USER", "auth"),
            ("DB_PASSWORD", "pw"),
            ("DB_DATABASE", "authdb"),
        ])
        .unwrap()
    }

    fn statement(sql: &str) -> BoundStatement {
        BoundStatement {
            sql: sql.to_string(),
            params: Vec::new(),
            kind: StatementKind::Query,
        }
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let driver = MemoryDriver::new();
        driver.fail_next_connects(1);
        assert!(driver.connect(&descriptor()).await.is_err());
        assert!(driver.connect(&descriptor()).await.is_ok());
        assert_eq!(driver.connect_attempts(), 2);
        assert_eq!(driver.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_responses_match_by_fragment() {
        let driver = MemoryDriver::new();
        driver.respond_to("FROM users", vec![Row::from_pairs([("id", json!(1))])]);
        let mut session = driver.connect(&descriptor()).await.unwrap();

        let output = session.execute(&statement("SELECT id FROM users")).await.unwrap();
        assert_eq!(output.rows.len(), 1);
        let output = session.execute(&statement("SELECT 1")).await.unwrap();
        assert!(output.rows.is_empty());
        assert_eq!(driver.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_close_failure_for_selected_session() {
        let driver = MemoryDriver::new();
        driver.fail_close_for_session(2);
        let first = driver.connect(&descriptor()).await.unwrap();
        let second = driver.connect(&descriptor()).await.unwrap();
        assert!(first.close().await.is_ok());
        assert!(second.close().await.is_err());
        assert_eq!(driver.sessions_closed(), 2);
    }
}
