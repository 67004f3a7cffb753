//! Error types for the database-access core.
//!
//! All failures surface as a single `DbError` built with `thiserror`. Each variant
//! belongs to an [`ErrorClass`] so a boundary can tell a caller mistake from a
//! transient infrastructure failure from something unrecoverable.

use thiserror::Error;

/// Coarse classification of a [`DbError`] for callers at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller supplied malformed input. Retrying will not help.
    CallerMistake,
    /// The infrastructure failed in a way that may succeed on a later attempt.
    Transient,
    /// Configuration or server-side failure that needs intervention.
    Unrecoverable,
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Database configuration incomplete. {}", describe_config_problems(.missing, .invalid))]
    Config {
        missing: Vec<String>,
        /// (variable, reason)
        invalid: Vec<(String, String)>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Cannot bind parameter '{parameter}': {message}")]
    ParameterBinding { parameter: String, message: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (connection: {connection_id})")]
    Transaction {
        message: String,
        connection_id: String,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn describe_config_problems(missing: &[String], invalid: &[(String, String)]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("Missing: {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        let invalid = invalid
            .iter()
            .map(|(name, reason)| format!("{name} ({reason})"))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("Invalid: {invalid}"));
    }
    parts.join("; ")
}

impl DbError {
    /// Create a configuration error from the collected problems.
    pub fn config(missing: Vec<String>, invalid: Vec<(String, String)>) -> Self {
        Self::Config { missing, invalid }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a parameter binding error.
    pub fn parameter_binding(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParameterBinding {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            connection_id: connection_id.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Whether a retry policy may attempt the operation again.
    ///
    /// Server-side execution failures (deadlocks, serialization conflicts)
    /// are retried by the statement policy; caller mistakes never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Execution { .. }
        )
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } | Self::ParameterBinding { .. } => ErrorClass::CallerMistake,
            Self::Connection { .. } | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Config { .. }
            | Self::Execution { .. }
            | Self::Transaction { .. }
            | Self::Internal { .. } => ErrorClass::Unrecoverable,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the DB_* settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify DB_ENCRYPT / DB_TRUST_CERT and the server certificate",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::execution(format!("Type not found: {}", type_name), None, "")
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None, "")
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Encode(source) => {
                DbError::parameter_binding("?", format!("Encode error: {}", source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => {
                DbError::connection("Database worker crashed", "Reconnect to the database")
            }
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
