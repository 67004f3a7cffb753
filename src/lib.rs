//! authdb-core
//!
//! Database-access core for an authentication backend: resolves connection
//! settings from the environment, opens dedicated PostgreSQL or MySQL
//! connections with bounded retry, executes parameterized statements and
//! stored procedures, drives explicit transactions, and reports health and
//! connection statistics with coordinated shutdown.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;

pub use config::{Config, ConnectionDescriptor};
pub use db::{
    Connection, ConnectionManager, Diagnostics, QueryExecutor, RetryPolicy, TransactionController,
};
pub use error::{DbError, DbResult, ErrorClass};
