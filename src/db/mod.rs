//! Database access layer.
//!
//! - Driver seam and backends (sqlx, in-memory)
//! - Connection acquisition and the open-connection registry
//! - Retry with linear backoff
//! - Statement execution and parameter binding
//! - Transaction control
//! - Health, stats and shutdown

pub mod backend;
pub mod connection;
pub mod diagnostics;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod memory;
pub mod params;
pub mod registry;
pub mod retry;
pub mod transaction;
pub mod types;

pub use backend::SqlxDriver;
pub use connection::{
    Connection, ConnectionEvent, ConnectionManager, ConnectionObserver, LoggingObserver,
};
pub use diagnostics::{Diagnostics, HealthReport, HealthStatus};
pub use driver::{
    BoundParam, BoundStatement, Dialect, Driver, Session, SessionOutput, StatementKind,
};
pub use executor::QueryExecutor;
pub use memory::MemoryDriver;
pub use registry::ConnectionRegistry;
pub use retry::{RetryPolicy, with_retry, with_retry_if};
pub use transaction::TransactionController;
