//! Explicit transaction control on a single connection.
//!
//! Each call is a single attempt: no retry, no nesting, no savepoints and no
//! automatic rollback. The caller owns the begin/commit/rollback sequence.

use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionController;

impl TransactionController {
    pub fn new() -> Self {
        Self
    }

    pub async fn begin(&self, conn: &Connection) -> DbResult<()> {
        conn.begin()
            .await
            .map_err(|e| tag(conn, "begin", e))?;
        info!(connection_id = conn.id(), "Transaction started");
        Ok(())
    }

    pub async fn commit(&self, conn: &Connection) -> DbResult<()> {
        conn.commit()
            .await
            .map_err(|e| tag(conn, "commit", e))?;
        info!(connection_id = conn.id(), "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self, conn: &Connection) -> DbResult<()> {
        conn.rollback()
            .await
            .map_err(|e| tag(conn, "rollback", e))?;
        info!(connection_id = conn.id(), "Transaction rolled back");
        Ok(())
    }
}

/// Surface every failure as a transaction error on this connection.
fn tag(conn: &Connection, operation: &str, error: DbError) -> DbError {
    warn!(
        connection_id = conn.id(),
        operation = operation,
        error = %error,
        "Transaction operation failed"
    );
    let message = match error {
        DbError::Transaction { message, .. } => message,
        other => format!("{operation} failed: {other}"),
    };
    DbError::transaction(message, conn.id().to_string())
}
