//! Error types for the YugabyteDB plugin.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants map one-to-one onto the failure classes a caller has to tell apart:
//! bad configuration, use before initialization, connectivity, bad role SQL,
//! failed statements, and deliberately unimplemented operations.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    #[error("not initialized")]
    NotInitialized,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("empty creation statement")]
    EmptyStatement,

    #[error("failed to execute query: {message}, query is: {query}, values: {values:?}")]
    StatementExecution {
        message: String,
        query: String,
        values: BTreeMap<String, String>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42704" for undefined object
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("{operation} is not implemented")]
    Unimplemented { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration validation error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement execution error carrying the offending query.
    pub fn statement(
        source: &DbError,
        query: impl Into<String>,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self::StatementExecution {
            message: source.to_string(),
            query: query.into(),
            values,
        }
    }

    /// Create a template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an unimplemented operation error.
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Prefix the message of this error with additional context.
    ///
    /// The variant is preserved so callers can still match on the error class.
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::ConfigValidation { message } => Self::ConfigValidation {
                message: format!("{context}: {message}"),
            },
            Self::Connection {
                message,
                suggestion,
            } => Self::Connection {
                message: format!("{context}: {message}"),
                suggestion,
            },
            Self::Database {
                message,
                sql_state,
                suggestion,
            } => Self::Database {
                message: format!("{context}: {message}"),
                sql_state,
                suggestion,
            },
            Self::Template { message } => Self::Template {
                message: format!("{context}: {message}"),
            },
            Self::Internal { message } => Self::Internal {
                message: format!("{context}: {message}"),
            },
            Self::Timeout {
                operation,
                elapsed_secs,
            } => Self::Timeout {
                operation: format!("{context}: {operation}"),
                elapsed_secs,
            },
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// The plugin never retries on its own; this is a hint for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
    /// Convert an error returned while acquiring from a pool.
    ///
    /// A pool timeout becomes [`DbError::Timeout`] carrying the pool's
    /// configured acquire timeout; everything else maps as usual.
    pub fn from_pool(err: sqlx::Error, acquire_timeout: std::time::Duration) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                u32::try_from(acquire_timeout.as_secs()).unwrap_or(u32::MAX),
            ),
            other => DbError::from(other),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check host, port, credentials and sslmode in the plugin configuration",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the role's creation statements and the objects they reference",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Check database server status and the connect_timeout setting",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify the sslmode setting and server certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for plugin operations.
pub type DbResult<T> = Result<T, DbError>;
