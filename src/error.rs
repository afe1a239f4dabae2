use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A query against the warehouse failed (connection, syntax, or row decoding).
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Schema resolution failed: none of [{}] exist", .candidates.join(", "))]
    SchemaResolution { candidates: Vec<String> },

    #[error("Required column for {field} missing from {table}")]
    MissingColumn { table: String, field: String },

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Invalid date: {0}")]
    DateParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions reported alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A filter was requested for a dimension the resolved table has no column for.
    ColumnAbsent { filter: String },
    /// No individual target exists; the reported target is an estimate.
    TargetNotFound { salesman_code: String },
    /// An independent sub-aggregate failed and was replaced with empty data.
    SubQueryFailed { section: String, message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ColumnAbsent { filter } => {
                write!(f, "filter '{filter}' dropped: no backing column")
            }
            Warning::TargetNotFound { salesman_code } => {
                write!(f, "no individual target for {salesman_code}; using estimate")
            }
            Warning::SubQueryFailed { section, message } => {
                write!(f, "{section} unavailable: {message}")
            }
        }
    }
}

/// Success/failure envelope for whatever boundary layer wraps the engine.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            data: None,
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(&e),
        }
    }
}
