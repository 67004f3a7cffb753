//! Outbound transport seam.
//!
//! A [`Driver`] performs the connect handshake and hands back a [`Session`]
//! bound to one live connection. Everything above this module is
//! backend-agnostic; the sqlx backend and the in-memory backend both plug in
//! here.

use crate::config::ConnectionDescriptor;
use crate::error::DbResult;
use crate::models::{DatabaseType, ParamValue, Row, WireType};
use async_trait::async_trait;

/// Positional placeholder style of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1, $2, ...`; a name used twice reuses its position.
    Postgres,
    /// `?` per occurrence.
    MySql,
}

impl Dialect {
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${position}"),
            Self::MySql => "?".to_string(),
        }
    }

    pub(crate) fn reuses_positions(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl From<DatabaseType> for Dialect {
    fn from(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL => Self::Postgres,
            DatabaseType::MySQL => Self::MySql,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Procedure,
}

/// A parameter in positional order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: ParamValue,
}

impl BoundParam {
    pub fn wire_type(&self) -> WireType {
        self.value.wire_type()
    }
}

/// Statement text in the backend's positional form plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<BoundParam>,
    pub kind: StatementKind,
}

/// Raw output of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutput {
    /// In arrival order.
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Open a new connection. Timeouts are applied by the caller.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<Box<dyn Session>>;
}

/// One live connection.
///
/// Transaction-state violations (commit without begin, nested begin) are
/// reported by the session as `DbError::Transaction`.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, statement: &BoundStatement) -> DbResult<SessionOutput>;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    async fn close(self: Box<Self>) -> DbResult<()>;
}
