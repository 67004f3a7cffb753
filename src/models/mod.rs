//! Data models for the database-access core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionSnapshot, ConnectionState, ConnectionStats, DatabaseType};
pub use query::{
    Column, IntoParameters, ParamValue, QueryParameters, QueryResult, Row, WireType,
};
